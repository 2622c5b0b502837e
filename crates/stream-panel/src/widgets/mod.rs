pub mod field_input;
pub mod form;
pub mod status_bar;
pub mod surface;
