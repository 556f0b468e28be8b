//! Stream name codec.
//!
//! Stream names follow the grammar `category[:type(+type)*][-id(+id)*]`.
//! Everything before the first `-` is the category (including any types);
//! everything after it is the id. A name without a `-` addresses the whole
//! category.
//!
//! ```
//! use message_store::stream_name::{self, StreamNameOptions};
//!
//! let name = stream_name::create(
//!     "account",
//!     Some("123"),
//!     &StreamNameOptions::new().with_type("command"),
//! )
//! .unwrap();
//!
//! assert_eq!(name, "account:command-123");
//! assert_eq!(stream_name::get_category(&name), "account:command");
//! assert_eq!(stream_name::get_entity_name(&name), "account");
//! assert_eq!(stream_name::get_types(&name), vec!["command"]);
//! assert_eq!(stream_name::get_cardinal_id(&name), Some("123"));
//! ```

use crate::error::{Error, Result};

/// Separates the category from the id
pub const ID_SEPARATOR: char = '-';

/// Separates the entity name from its types
pub const TYPE_SEPARATOR: char = ':';

/// Joins compound ids and multiple types
pub const COMPOUND_SEPARATOR: char = '+';

/// Optional parts of a stream name passed to [`create`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamNameOptions {
    /// Category types, in order
    pub types: Vec<String>,

    /// Id placed before every other id
    pub cardinal_id: Option<String>,

    /// Ids placed after the main id
    pub ids: Vec<String>,
}

impl StreamNameOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single type (builder pattern)
    pub fn with_type(mut self, stream_type: impl Into<String>) -> Self {
        self.types.push(stream_type.into());
        self
    }

    /// Add several types (builder pattern)
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Set the cardinal id (builder pattern)
    pub fn with_cardinal_id(mut self, cardinal_id: impl Into<String>) -> Self {
        self.cardinal_id = Some(cardinal_id.into());
        self
    }

    /// Add further compound ids (builder pattern)
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Build a stream name from its parts.
///
/// The id list is `[cardinal_id, id, ids...]` with absent parts skipped. With no
/// id at all the result is a category name.
///
/// Fails with [`Error::Assertion`] when the category is empty or when any part
/// contains a separator that would make the name ambiguous to decode.
///
/// # Examples
///
/// ```
/// use message_store::stream_name::{create, StreamNameOptions};
///
/// let opts = StreamNameOptions::new()
///     .with_types(["command", "position"])
///     .with_ids(["2"]);
/// assert_eq!(create("account", Some("1"), &opts).unwrap(), "account:command+position-1+2");
/// assert_eq!(create("account", None, &StreamNameOptions::new()).unwrap(), "account");
/// assert!(create("", None, &StreamNameOptions::new()).is_err());
/// ```
pub fn create(category: &str, id: Option<&str>, options: &StreamNameOptions) -> Result<String> {
    if category.is_empty() {
        return Err(Error::assertion("stream name category must not be empty"));
    }
    if category.contains([ID_SEPARATOR, TYPE_SEPARATOR, COMPOUND_SEPARATOR]) {
        return Err(Error::assertion(format!(
            "category '{}' must not contain '{}', '{}' or '{}'",
            category, ID_SEPARATOR, TYPE_SEPARATOR, COMPOUND_SEPARATOR
        )));
    }

    let mut name = category.to_string();

    if !options.types.is_empty() {
        for stream_type in &options.types {
            if stream_type.is_empty()
                || stream_type.contains([ID_SEPARATOR, TYPE_SEPARATOR, COMPOUND_SEPARATOR])
            {
                return Err(Error::assertion(format!("invalid stream type '{}'", stream_type)));
            }
        }
        name.push(TYPE_SEPARATOR);
        name.push_str(&options.types.join("+"));
    }

    let ids: Vec<&str> = options
        .cardinal_id
        .as_deref()
        .into_iter()
        .chain(id)
        .chain(options.ids.iter().map(String::as_str))
        .collect();

    if !ids.is_empty() {
        if let Some(bad) = ids.iter().find(|id| id.is_empty() || id.contains(COMPOUND_SEPARATOR)) {
            return Err(Error::assertion(format!("invalid stream id '{}'", bad)));
        }
        name.push(ID_SEPARATOR);
        name.push_str(&ids.join("+"));
    }

    Ok(name)
}

/// Extract the category portion from a stream name, including any types.
///
/// # Examples
///
/// ```
/// use message_store::stream_name::get_category;
///
/// assert_eq!(get_category("account-123"), "account");
/// assert_eq!(get_category("account"), "account");
/// assert_eq!(get_category("account:command-123"), "account:command");
/// assert_eq!(get_category("transaction:event+audit-xyz"), "transaction:event+audit");
/// ```
pub fn get_category(stream_name: &str) -> &str {
    stream_name
        .split_once(ID_SEPARATOR)
        .map(|(category, _)| category)
        .unwrap_or(stream_name)
}

/// Extract the entity name: the category without its types.
///
/// # Examples
///
/// ```
/// use message_store::stream_name::get_entity_name;
///
/// assert_eq!(get_entity_name("account:command-123"), "account");
/// assert_eq!(get_entity_name("account"), "account");
/// ```
pub fn get_entity_name(stream_name: &str) -> &str {
    let category = get_category(stream_name);
    category
        .split_once(TYPE_SEPARATOR)
        .map(|(entity, _)| entity)
        .unwrap_or(category)
}

/// Extract the whole id portion (everything after the first `-`).
///
/// # Examples
///
/// ```
/// use message_store::stream_name::get_id;
///
/// assert_eq!(get_id("account-123"), Some("123"));
/// assert_eq!(get_id("account-123+456"), Some("123+456"));
/// assert_eq!(get_id("account:command"), None);
/// ```
pub fn get_id(stream_name: &str) -> Option<&str> {
    stream_name.split_once(ID_SEPARATOR).map(|(_, id)| id)
}

/// Extract the ordered list of compound ids.
pub fn get_ids(stream_name: &str) -> Vec<&str> {
    get_id(stream_name)
        .map(|id| id.split(COMPOUND_SEPARATOR).collect())
        .unwrap_or_default()
}

/// Extract the cardinal id: the first segment of a compound id.
///
/// # Examples
///
/// ```
/// use message_store::stream_name::get_cardinal_id;
///
/// assert_eq!(get_cardinal_id("account-123"), Some("123"));
/// assert_eq!(get_cardinal_id("account-123+456"), Some("123"));
/// assert_eq!(get_cardinal_id("account"), None);
/// ```
pub fn get_cardinal_id(stream_name: &str) -> Option<&str> {
    get_id(stream_name).map(|id| {
        id.split_once(COMPOUND_SEPARATOR)
            .map(|(cardinal, _)| cardinal)
            .unwrap_or(id)
    })
}

/// Extract the category types, in order. Empty when the category has none.
///
/// # Examples
///
/// ```
/// use message_store::stream_name::get_types;
///
/// assert_eq!(get_types("transaction:event+audit-xyz"), vec!["event", "audit"]);
/// assert!(get_types("account-123").is_empty());
/// ```
pub fn get_types(stream_name: &str) -> Vec<&str> {
    get_category(stream_name)
        .split_once(TYPE_SEPARATOR)
        .map(|(_, types)| types.split(COMPOUND_SEPARATOR).collect())
        .unwrap_or_default()
}

/// True when the name has no id and therefore addresses a whole category.
pub fn is_category(stream_name: &str) -> bool {
    !stream_name.contains(ID_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_category() {
        assert_eq!(create("account", None, &StreamNameOptions::new()).unwrap(), "account");
        assert_eq!(
            create("account", None, &StreamNameOptions::new().with_type("command")).unwrap(),
            "account:command"
        );
    }

    #[test]
    fn test_create_ids_order() {
        let opts = StreamNameOptions::new()
            .with_cardinal_id("c")
            .with_ids(["x", "y"]);
        assert_eq!(create("account", Some("1"), &opts).unwrap(), "account-c+1+x+y");

        let opts = StreamNameOptions::new().with_ids(["x"]);
        assert_eq!(create("account", None, &opts).unwrap(), "account-x");
    }

    #[test]
    fn test_create_rejects_ambiguous_parts() {
        let none = StreamNameOptions::new();
        assert!(matches!(create("", None, &none), Err(Error::Assertion(_))));
        assert!(create("acc-ount", None, &none).is_err());
        assert!(create("account:command", None, &none).is_err());
        assert!(create("account", Some("1+2"), &none).is_err());
        assert!(create("account", Some(""), &none).is_err());
        assert!(create("account", None, &StreamNameOptions::new().with_type("a+b")).is_err());
        assert!(create("account", None, &StreamNameOptions::new().with_type("")).is_err());
    }

    #[test]
    fn test_id_may_contain_dashes() {
        let id = "0b8ef5e0-6f0a-4b4a-9c2e-1d2f3a4b5c6d";
        let name = create("account", Some(id), &StreamNameOptions::new()).unwrap();
        assert_eq!(get_id(&name), Some(id));
        assert_eq!(get_cardinal_id(&name), Some(id));
        assert_eq!(get_category(&name), "account");
    }

    #[test]
    fn test_round_trip() {
        let cases: Vec<(&str, Option<&str>, StreamNameOptions)> = vec![
            ("account", None, StreamNameOptions::new()),
            ("account", Some("123"), StreamNameOptions::new()),
            ("account", Some("123"), StreamNameOptions::new().with_type("command")),
            (
                "transaction",
                Some("abc"),
                StreamNameOptions::new().with_types(["event", "audit", "v2"]),
            ),
            (
                "order",
                Some("o1"),
                StreamNameOptions::new().with_cardinal_id("tenant").with_ids(["line", "7"]),
            ),
            ("order", None, StreamNameOptions::new().with_types(["snapshot", "position"])),
        ];

        for (category, id, opts) in cases {
            let name = create(category, id, &opts).unwrap();

            assert_eq!(get_entity_name(&name), category, "{}", name);
            assert_eq!(get_types(&name), opts.types, "{}", name);

            let expected_ids: Vec<&str> = opts
                .cardinal_id
                .as_deref()
                .into_iter()
                .chain(id)
                .chain(opts.ids.iter().map(String::as_str))
                .collect();
            assert_eq!(get_ids(&name), expected_ids, "{}", name);
            assert_eq!(get_cardinal_id(&name), expected_ids.first().copied(), "{}", name);
            assert_eq!(is_category(&name), expected_ids.is_empty(), "{}", name);
        }
    }

    #[test]
    fn test_decoders() {
        assert_eq!(get_category("withdrawal:position-consumer-1"), "withdrawal:position");
        assert_eq!(get_id("withdrawal:position-consumer-1"), Some("consumer-1"));
        assert_eq!(get_ids("account"), Vec::<&str>::new());
        assert_eq!(get_types("account:command"), vec!["command"]);
        assert_eq!(get_entity_name("transaction:event+audit"), "transaction");
        assert!(is_category("transaction:event+audit"));
        assert!(!is_category("transaction:event+audit-xyz"));
    }
}
