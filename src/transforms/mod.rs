// 単一パスの変換ツール（並列処理エンジンは使用しない）

pub mod binder_db;
pub mod contigs;
pub mod kmers;
pub mod netmhc;

pub use binder_db::{build_binder_database, BinderDbStats};
pub use contigs::{assemble_contigs, ContigAssembler, ContigStats};
pub use kmers::{extract_unique_kmers, KmerSet, KmerStats};
pub use netmhc::{extract_ic50_values, parse_netmhc_file};
