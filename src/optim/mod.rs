pub mod golden_section;
pub mod nelder_mead;
