pub mod core {
    pub mod data_type;
    pub mod schema;
    pub mod value;
}

pub mod graph {
    pub mod assignment;
    pub mod definition;
    pub mod validate;
}

pub mod records {
    pub mod row;
}

pub mod error;
