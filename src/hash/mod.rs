// Checksums and tables behind the match finder.
//
// - `rolling` large (source) and small (target) checksums
// - `table`   checksum -> position tables
// - `config`  matcher tuning constants

pub mod config;
pub mod rolling;
pub mod table;
