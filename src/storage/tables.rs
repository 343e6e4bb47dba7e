use redb::TableDefinition;

/// Version ledger: (file_path, version) -> FileVersion (msgpack).
/// Key order groups every path's versions together, ascending.
pub const FILE_VERSIONS: TableDefinition<(&str, u64), &[u8]> =
    TableDefinition::new("file_versions");

/// Change sets: id -> ChangeSet (msgpack), staged operations embedded
pub const CHANGE_SETS: TableDefinition<u64, &[u8]> = TableDefinition::new("change_sets");

/// Author index: author id -> msgpack Vec of change set ids
pub const AUTHOR_CHANGE_SETS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("author_change_sets");

/// Sharing records: file_path -> SharingRecord (msgpack)
pub const SHARES: TableDefinition<&str, &[u8]> = TableDefinition::new("shares");

/// Token index: public token -> file_path (for /public/ lookups)
pub const SHARE_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("share_tokens");

/// Monotonic id sequences: sequence name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
