pub mod http;

pub use http::HttpTransport;
