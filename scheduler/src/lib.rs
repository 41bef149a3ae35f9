// msc — memory scheduler core
//
// Emits, for every non-fusion computation of a dataflow IR module, a
// linear instruction order that respects data and control dependencies
// while minimizing the peak of simultaneously live buffer bytes.

pub mod buffers;
pub mod dfs;
pub mod error;
pub mod heap;
pub mod ir;
pub mod list;
pub mod schedule;
pub mod update;
pub mod use_index;
pub mod verify;
