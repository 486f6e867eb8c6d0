pub mod auth;
pub mod comments;
pub mod profile;
pub mod snippet;
pub mod snippets;
