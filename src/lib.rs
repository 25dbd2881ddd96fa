pub mod access;
pub mod ai;
pub mod auth;
pub mod cloudinary;
pub mod config;
pub mod db;
pub mod error;
pub mod fields;
pub mod models;
pub mod reports;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod status;
pub mod storage;
pub mod store;
pub mod submission;
pub mod utils;
pub mod wizard;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
