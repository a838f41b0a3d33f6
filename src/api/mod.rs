//! Request extraction and response envelope helpers shared by the routes.

pub mod response;
pub mod upload;

pub use response::{Accepted, DataResponse};
pub use upload::{read_documents, read_single_document};
