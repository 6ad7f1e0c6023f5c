//! Syntax checks for object paths, interface, member and bus names.

const MAX_NAME_LEN: usize = 255;

fn is_element_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {
            bytes.iter().all(|c| is_element_char(*c))
        }
        _ => false,
    }
}

/// `/`, or `/` followed by non-empty `[A-Za-z0-9_]` elements separated by `/`.
pub fn is_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/')
        .all(|element| !element.is_empty() && element.bytes().all(is_element_char))
}

/// Two or more dot separated identifiers.
pub fn is_interface(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let mut count = 0;
    for element in name.split('.') {
        if !is_identifier(element) {
            return false;
        }
        count += 1;
    }
    count >= 2
}

/// A single identifier.
pub fn is_member(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && is_identifier(name)
}

/// Unique (`:1.42`) or well-known (`org.example.Service`) bus name.
pub fn is_bus_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let (unique, body) = match name.strip_prefix(':') {
        Some(body) => (true, body),
        None => (false, name),
    };
    let mut count = 0;
    for element in body.split('.') {
        let bytes = element.as_bytes();
        if bytes.is_empty() {
            return false;
        }
        let valid_char = |c: &u8| is_element_char(*c) || *c == b'-';
        if !bytes.iter().all(valid_char) {
            return false;
        }
        if !unique && bytes[0].is_ascii_digit() {
            return false;
        }
        count += 1;
    }
    count >= 2
}

/// Whether `path` is `namespace` itself or lies beneath it.
pub fn path_in_namespace(path: &str, namespace: &str) -> bool {
    if namespace == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(namespace) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_object_paths() {
        for good in ["/", "/otree/frobber", "/a_b/C9", "/cliques/x/0"] {
            assert!(is_object_path(good), "{} should be valid", good);
        }
        for bad in ["", "invalid/path", "//", "/trailing/", "/a//b", "/a-b", "/ünï"] {
            assert!(!is_object_path(bad), "{} should be invalid", bad);
        }
    }

    #[test]
    fn test_interfaces() {
        assert!(is_interface("com.redhat.Cockpit.DBusTests.Frobber"));
        assert!(is_interface("org.freedesktop.DBus"));
        assert!(is_interface("_a._b"));
        assert!(!is_interface("Frobber"));
        assert!(!is_interface("com..Frobber"));
        assert!(!is_interface("com.9lives"));
        assert!(!is_interface("com.red-hat"));
        assert!(!is_interface(".com.example"));
        assert!(!is_interface(&format!("a.{}", "b".repeat(300))));
    }

    #[test]
    fn test_members() {
        assert!(is_member("HelloWorld"));
        assert!(is_member("_private"));
        assert!(!is_member(""));
        assert!(!is_member("9Lives"));
        assert!(!is_member("Hello.World"));
        assert!(!is_member("Hello World"));
    }

    #[test]
    fn test_bus_names() {
        assert!(is_bus_name("com.redhat.Cockpit.DBusTests.Test"));
        assert!(is_bus_name(":1.42"));
        assert!(is_bus_name("org.example-name.Service"));
        assert!(!is_bus_name("org"));
        assert!(!is_bus_name("org.9example"));
        assert!(!is_bus_name(":1..2"));
    }

    #[test]
    fn test_namespaces() {
        assert!(path_in_namespace("/otree/frobber", "/"));
        assert!(path_in_namespace("/otree", "/otree"));
        assert!(path_in_namespace("/otree/frobber", "/otree"));
        assert!(!path_in_namespace("/otreefoo", "/otree"));
        assert!(!path_in_namespace("/other", "/otree"));
    }

    proptest! {
        #[test]
        fn prop_paths_without_leading_slash_are_invalid(s in "[a-zA-Z0-9_/]{1,40}") {
            prop_assume!(!s.starts_with('/'));
            prop_assert!(!is_object_path(&s));
        }

        #[test]
        fn prop_joined_elements_are_valid_paths(
            elements in proptest::collection::vec("[a-zA-Z0-9_]{1,8}", 1..6)
        ) {
            let path = format!("/{}", elements.join("/"));
            prop_assert!(is_object_path(&path));
            prop_assert!(path_in_namespace(&path, "/"));
            let first = format!("/{}", elements[0]);
            prop_assert!(path_in_namespace(&path, &first));
        }
    }
}
