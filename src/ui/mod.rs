pub mod format;
mod symbols;
