pub mod text;
pub mod trace;
