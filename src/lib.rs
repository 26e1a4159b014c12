//! emberdb: an embedded, ordered key→value store on the LSM-tree design.
//!
//! Writes land in a write-ahead log and an in-memory skip list; full
//! memtables freeze and flush to immutable sorted table files, which
//! background compaction merges down a small number of levels. Reads see
//! a consistent snapshot across the memtable, the table being flushed and
//! every level, with multi-version concurrency keyed by sequence numbers.
//!
//! ```no_run
//! use emberdb::{Database, Options, ReadOptions, WriteOptions};
//!
//! let db = Database::open(Options::default(), "/tmp/demo-db")?;
//! db.put(&WriteOptions::default(), b"greeting", b"hello")?;
//! assert_eq!(db.get(&ReadOptions::default(), b"greeting")?, b"hello");
//! # Ok::<(), emberdb::Error>(())
//! ```

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod comparator;
pub mod db;
pub mod encoding;
pub mod error;
pub mod filename;
pub mod flock;
pub mod iterator;
pub mod keys;
pub mod memtable;
pub mod options;
pub mod sstable;
pub mod table_cache;
pub mod version;
pub mod wal;

pub use batch::WriteBatch;
pub use bloom::BloomFilterPolicy;
pub use comparator::{BytewiseComparator, Comparator};
pub use db::{repair, Database, DbIterator, Snapshot};
pub use error::{Error, Result};
pub use options::{Options, ReadOptions, WriteOptions};
