pub mod env;
pub mod graph;

pub mod settings {
    pub mod error;
    pub mod file;
    pub mod validated;
    pub mod validator;
}
