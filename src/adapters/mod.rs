//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter           | Implements          | Connects to                 |
//! |-------------------|---------------------|-----------------------------|
//! | `gpio_protection` | ProtectionPort      | Relay + status LED pins     |
//! | `log_sink`        | EventSink           | `log` facade                |
//! | `memory_store`    | StoragePort         | In-memory map (host)        |
//! | `sim_pack`        | MeasurementSource   | Simulated cell stack (host) |
//! |                   | BalancingActuator   |                             |
//! |                   | FaultSource         |                             |
//! |                   | ProtectionPort      |                             |

pub mod gpio_protection;
pub mod log_sink;
pub mod memory_store;
pub mod sim_pack;
