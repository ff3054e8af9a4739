//! # Fiscal Core
//!
//! Shared money and time primitives for the Strata platform.
//!
//! ## Why This Lives in Tier 1
//!
//! Every module that touches money or civil dates depends on the same three
//! rules, so they live in one platform crate:
//! - money is an integer count of centavos (`Centavos`) everywhere inside the
//!   system; pesos appear only at serialization boundaries
//! - civil dates resolve in a single fixed tenant-level UTC offset with no
//!   DST handling
//! - transaction document ids follow the sortable `YYYY-MM-DD_HHMMSS_nnn`
//!   scheme and are issued by an explicit, injectable generator
//!
//! Pure functions only; this crate performs no I/O.

pub mod calendar;
pub mod ids;
pub mod money;

pub use calendar::{CalendarError, FiscalQuarter};
pub use ids::{Clock, FixedClock, IdGenerator, SystemClock};
pub use money::{Centavos, MoneyError};
