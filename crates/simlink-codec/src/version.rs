//! Communication version compatibility.
//!
//! Versions are `MAJOR.MINOR[.PATCH]` strings. Two versions interoperate
//! when their majors match; while the major is 0 the minors must match
//! as well, since pre-1.0 minor releases may break the protocol.

/// Parse `MAJOR.MINOR[.PATCH][-pre]` into `(major, minor)`.
fn major_minor(v: &str) -> Option<(u64, u64)> {
    let core = v.trim().split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    if let Some(patch) = parts.next() {
        patch.parse::<u64>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor))
}

/// Whether a peer speaking `theirs` can talk to a bridge speaking `ours`.
///
/// Unparseable versions are never compatible.
pub fn is_compatible(ours: &str, theirs: &str) -> bool {
    match (major_minor(ours), major_minor(theirs)) {
        (Some((our_major, our_minor)), Some((their_major, their_minor))) => {
            our_major == their_major && (our_major != 0 || our_minor == their_minor)
        }
        _ => false,
    }
}
