pub mod credentials;
pub mod csv;
pub mod harvest;
pub mod output;
