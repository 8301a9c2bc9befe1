pub mod metadata_store;
pub mod object_store;
pub mod upload_service;
