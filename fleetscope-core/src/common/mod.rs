pub mod async_utils;
