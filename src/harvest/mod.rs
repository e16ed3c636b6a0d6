pub mod audit;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod district;
pub mod driver;
pub mod feed;
pub mod history;
pub mod lock;
pub mod paths;
pub mod util;
pub mod warn;
pub mod xml;
