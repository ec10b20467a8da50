pub mod backup;
pub mod init;
pub mod items;
pub mod maintenance;
pub mod migrate;
pub mod misc;
pub mod query;
pub mod transfer;
