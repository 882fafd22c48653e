//! Logical id derivation
//!
//! Two naming schemes exist for resources in a document:
//!
//! - **Content-addressable**: the id is a SHA-256 digest over the fields that
//!   define the resource's identity, so re-assembling identical input yields
//!   identical ids. Used for functions, roles, permissions, event-source
//!   mappings and shared helpers.
//! - **Salted**: the id mixes in a random value. Used for helper invocations
//!   whose identity need not survive across runs.
//!
//! Uses SHA-256 from aws-lc-rs for FIPS compliance.

use aws_lc_rs::digest::{Context, SHA256};
use rand::Rng;

/// Separator fed between fields so ("ab", "c") and ("a", "bc") differ
const FIELD_SEPARATOR: &[u8] = &[0];

/// Incremental builder for content-addressable logical ids.
///
/// ```
/// use stratus_common::naming::ContentId;
///
/// let id = ContentId::new("LambdaPerm")
///     .field("s3.amazonaws.com")
///     .optional(None)
///     .optional(Some("arn:aws:s3:::uploads"))
///     .finish();
/// assert!(id.starts_with("LambdaPerm"));
/// ```
pub struct ContentId {
    prefix: String,
    context: Context,
}

impl ContentId {
    /// Start a new id with the given type-hint prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            context: Context::new(&SHA256),
        }
    }

    /// Feed a required field
    pub fn field(self, value: impl AsRef<[u8]>) -> Self {
        self.bytes(value.as_ref())
    }

    /// Feed an optional field. Absent and empty values both occupy their
    /// slot as an empty field, so values cannot shift between slots.
    pub fn optional(self, value: Option<&str>) -> Self {
        self.bytes(value.unwrap_or_default().as_bytes())
    }

    /// Feed an integer as little-endian bytes
    pub fn number(self, value: u32) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    fn bytes(mut self, value: &[u8]) -> Self {
        self.context.update(value);
        self.context.update(FIELD_SEPARATOR);
        self
    }

    /// Produce `<prefix><hex digest>`
    pub fn finish(self) -> String {
        let digest = self.context.finish();
        format!("{}{}", self.prefix, hex(digest.as_ref()))
    }
}

/// Returns a logical id that is NOT content-addressable.
///
/// The `prefix` should hint at the resource type (e.g. `ConfigS3`,
/// `SubscriberSNS`).
pub fn salted_name<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let salt: u64 = rng.gen();
    ContentId::new(prefix)
        .field(prefix)
        .field(salt.to_string())
        .finish()
}

/// Replace runs of `.`, `-` and whitespace with a single `_`.
///
/// Used to turn a handler identity (e.g. `orders.Handle-v2`) into a name the
/// function runtime accepts as an export.
pub fn sanitized_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_run = false;
    for c in input.chars() {
        if c == '.' || c == '-' || c.is_whitespace() {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Lowercase hex encoding
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    #[test]
    fn content_ids_are_stable() {
        let a = ContentId::new("Lambda").field("orders.Handle").finish();
        let b = ContentId::new("Lambda").field("orders.Handle").finish();
        assert_eq!(a, b);
        // prefix + 64 hex chars
        assert_eq!(a.len(), "Lambda".len() + 64);
    }

    #[test]
    fn field_boundaries_matter() {
        let a = ContentId::new("X").field("ab").field("c").finish();
        let b = ContentId::new("X").field("a").field("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn absent_and_empty_optionals_are_equivalent() {
        let a = ContentId::new("X").field("p").optional(None).finish();
        let b = ContentId::new("X").field("p").optional(Some("")).finish();
        let c = ContentId::new("X").field("p").optional(Some("acct")).finish();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn optional_values_keep_their_slot() {
        let account_only = ContentId::new("LambdaPerm")
            .field("s3.amazonaws.com")
            .optional(Some("X"))
            .optional(None)
            .finish();
        let arn_only = ContentId::new("LambdaPerm")
            .field("s3.amazonaws.com")
            .optional(None)
            .optional(Some("X"))
            .finish();
        assert_ne!(account_only, arn_only);
    }

    #[test]
    fn salted_names_differ_per_draw() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = salted_name("ConfigS3", &mut rng);
        let b = salted_name("ConfigS3", &mut rng);
        assert!(a.starts_with("ConfigS3"));
        assert_ne!(a, b);
    }

    #[rstest]
    #[case("orders.Handle", "orders_Handle")]
    #[case("main.(*svc).Run-fm", "main_(*svc)_Run_fm")]
    #[case("a . - b", "a_b")]
    #[case("plain", "plain")]
    fn sanitizes_handler_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitized_name(input), expected);
    }
}
