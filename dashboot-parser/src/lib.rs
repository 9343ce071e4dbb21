mod grammar;
mod parser;
mod render;

pub use parser::parse_deployfile;
pub use render::render_deployfile;
