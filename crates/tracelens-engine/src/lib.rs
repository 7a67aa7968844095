pub mod assembler;

pub use assembler::{TITLE_DISPLAY_CHARS, assemble};
