use ulid::Ulid;

/// Generates a new ULID.
pub fn new_ulid() -> Ulid {
    Ulid::new()
}
