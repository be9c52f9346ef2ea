//! External collaborator services
//!
//! Sequential request/response calls that piggyback on the chat session:
//! weather lookups, stock-chart data, and the tone-mimicking responder.

pub mod mimic;
pub mod stocks;
pub mod weather;

pub use mimic::{MimicResponder, MimicSession};
pub use stocks::{StockSeries, StockService};
pub use weather::{WeatherReport, WeatherService};
