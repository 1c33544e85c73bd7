pub mod retry;
pub mod time_utils;
