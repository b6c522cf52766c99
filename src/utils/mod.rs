pub mod project_structure_formatter;
pub mod sources;
