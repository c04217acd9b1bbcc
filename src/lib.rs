pub mod config;
pub mod models;

// Object storage (MinIO / S3) / 对象存储
pub mod storage;
