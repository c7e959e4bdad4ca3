//! Public class name extraction.
//!
//! The name doubles as the compile unit (`<Name>.java`) and the class handed
//! to the launcher, so only the first declaration counts.

use crate::error::CycleError;

const KEYWORD: &str = "class";

/// Returns the identifier after the first whitespace-delimited `class` keyword.
///
/// The name ends at the next whitespace character, `{` or `<`. Anything that
/// is not a Java identifier is rejected, since the name becomes a file name.
pub fn extract_class_name(source: &str) -> Result<String, CycleError> {
    let mut search_from = 0;
    while let Some(offset) = source[search_from..].find(KEYWORD) {
        let start = search_from + offset;
        let end = start + KEYWORD.len();
        search_from = end;

        let preceded = source[..start]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        let followed = source[end..].chars().next().is_some_and(char::is_whitespace);
        if !(preceded && followed) {
            continue;
        }

        let rest = source[end..].trim_start();
        let name: String = rest
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '{' && *c != '<')
            .collect();
        if !is_java_identifier(&name) {
            return Err(CycleError::MalformedSource);
        }
        return Ok(name);
    }
    Err(CycleError::MalformedSource)
}

/// Whether `name` is a plain Java identifier: letters, digits, `_` and `$`,
/// not starting with a digit.
pub fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let part = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    !first.is_numeric() && part(first) && chars.all(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_public_class() {
        let src = "public class Foo { public static void main(String[] a){} }";
        assert_eq!(extract_class_name(src).unwrap(), "Foo");
    }

    #[test]
    fn stops_at_brace() {
        assert_eq!(extract_class_name("public class Bar{ }").unwrap(), "Bar");
    }

    #[test]
    fn accepts_other_whitespace() {
        assert_eq!(extract_class_name("public\tclass\n  Baz\n{}").unwrap(), "Baz");
    }

    #[test]
    fn skips_embedded_keyword() {
        let src = "import a.subclass.X; public class Real {}";
        assert_eq!(extract_class_name(src).unwrap(), "Real");
    }

    #[test]
    fn first_declaration_wins() {
        let src = "public class First {} class Second {}";
        assert_eq!(extract_class_name(src).unwrap(), "First");
    }

    #[test]
    fn missing_keyword_is_malformed() {
        let err = extract_class_name("public interface Foo {}").unwrap_err();
        assert!(matches!(err, CycleError::MalformedSource));
    }

    #[test]
    fn keyword_at_end_is_malformed() {
        assert!(extract_class_name("public class ").is_err());
        assert!(extract_class_name("public class").is_err());
        assert!(extract_class_name("").is_err());
    }

    #[test]
    fn empty_span_is_malformed() {
        assert!(extract_class_name("public class {").is_err());
    }

    #[test]
    fn type_parameters_end_the_name() {
        assert_eq!(extract_class_name("public class Box<T> { T v; }").unwrap(), "Box");
    }

    #[test]
    fn path_like_names_are_malformed() {
        for src in [
            "public class ../../x {",
            "public class a/b {",
            "public class C:\\evil {",
            "public class 9Lives {",
            "public class Foo.Bar {",
        ] {
            assert!(
                matches!(extract_class_name(src), Err(CycleError::MalformedSource)),
                "accepted {src:?}"
            );
        }
    }

    #[test]
    fn identifier_rules() {
        assert!(is_java_identifier("Main"));
        assert!(is_java_identifier("_tmp$1"));
        assert!(is_java_identifier("Grüße"));
        assert!(!is_java_identifier(""));
        assert!(!is_java_identifier("1st"));
        assert!(!is_java_identifier(".."));
    }
}
