pub mod cache;
pub mod exchange_client;
pub mod exchanger;

pub use cache::{ExchangeCache, InMemoryExchangeCache, spawn_purge_task};
pub use exchange_client::{
    ClientCredential, ExchangeError, ExchangeGrant, ExchangeRequest, ExchangedToken,
    HttpTokenExchanger, TokenExchanger,
};
pub use exchanger::OboExchanger;
