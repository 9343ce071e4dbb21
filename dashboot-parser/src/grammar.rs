use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "deployfile.pest"]
pub struct DeployfileParser;
