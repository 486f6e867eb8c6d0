pub mod auth;
pub mod clock;
pub mod comments;
pub mod git;
pub mod ids;
pub mod markdown;
pub mod read_marks;
pub mod sessions;
pub mod snippets;
pub mod storage;
pub mod users;
