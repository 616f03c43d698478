pub mod admin;
pub mod auth;
pub mod chat;
pub mod documents;
pub mod health;
pub mod multipart;
pub mod portal;
