pub mod cluster;
pub mod log_files;
pub mod metadata_feed;
pub mod status;
pub mod wait_utils;
