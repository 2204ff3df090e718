pub mod scanner;

pub use scanner::TaskScanner;
