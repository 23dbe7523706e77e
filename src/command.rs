//! Registration interface between console commands and the command interpreter.
//!
//! A command declares its aliases and a typed argument list; the interpreter
//! does the tokenizing and conversion and calls [`Command::execute`] with the
//! converted values.

use core::fmt;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    Unsigned,
    String,
}

impl ArgKind {
    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'u' => Some(Self::Unsigned),
            b's' => Some(Self::String),
            _ => None,
        }
    }
}

/// One declared argument of a command.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub optional: bool,
}

impl ArgSpec {
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            optional: true,
        }
    }

    /// Parse the compact form `[o]u:name` / `[o]s:name`, e.g. `"ou:count"`
    /// for an optional unsigned argument called `count`.
    pub const fn parse(descriptor: &'static str) -> Option<Self> {
        let bytes = descriptor.as_bytes();
        let optional = !bytes.is_empty() && bytes[0] == b'o';
        let tag = if optional { 1 } else { 0 };
        if bytes.len() < tag + 3 || bytes[tag + 1] != b':' {
            return None;
        }
        let Some(kind) = ArgKind::from_tag(bytes[tag]) else {
            return None;
        };
        let (_, name) = bytes.split_at(tag + 2);
        match core::str::from_utf8(name) {
            Ok(name) => Some(Self { name, kind, optional }),
            Err(_) => None,
        }
    }
}

/// `<name>` for required arguments, `[name]` for optional ones.
impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "[{}]", self.name)
        } else {
            write!(f, "<{}>", self.name)
        }
    }
}

/// A converted argument value.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Argument<'a> {
    Unsigned(u32),
    String(&'a str),
}

impl<'a> Argument<'a> {
    pub const fn kind(&self) -> ArgKind {
        match self {
            Argument::Unsigned(_) => ArgKind::Unsigned,
            Argument::String(_) => ArgKind::String,
        }
    }

    pub const fn as_unsigned(&self) -> Option<u32> {
        match *self {
            Argument::Unsigned(v) => Some(v),
            Argument::String(_) => None,
        }
    }

    pub const fn as_str(&self) -> Option<&'a str> {
        match *self {
            Argument::String(s) => Some(s),
            Argument::Unsigned(_) => None,
        }
    }
}

/// A console command. `C` is whatever context the interpreter hands over
/// (usually the interpreter itself).
pub trait Command<C: ?Sized> {
    /// Aliases; the first one is the primary name.
    fn names(&self) -> &'static [&'static str];

    fn arguments(&self) -> &'static [ArgSpec] {
        &[]
    }

    fn help_text(&self) -> &'static str;

    /// Run the command. Returns `false` if it could not do its job.
    fn execute(&self, ctx: &mut C, args: &[Argument<'_>]) -> bool;

    /// First alias starting with `prefix`.
    fn match_prefix(&self, prefix: &str) -> Option<&'static str> {
        self.names().iter().copied().find(|name| name.starts_with(prefix))
    }

    /// Minimum and maximum number of arguments accepted.
    fn arity(&self) -> (usize, usize) {
        let args = self.arguments();
        (args.iter().filter(|a| !a.optional).count(), args.len())
    }
}

#[cfg(test)]
mod tests {
    use std::string::{String, ToString};
    use std::vec::Vec;

    use super::*;

    const READ_ARGS: [ArgSpec; 2] = [
        match ArgSpec::parse("u:address") {
            Some(a) => a,
            None => panic!(),
        },
        match ArgSpec::parse("ou:count") {
            Some(a) => a,
            None => panic!(),
        },
    ];

    struct Read;

    impl Command<Vec<String>> for Read {
        fn names(&self) -> &'static [&'static str] {
            &["read", "rb", "rh", "rw"]
        }

        fn arguments(&self) -> &'static [ArgSpec] {
            &READ_ARGS
        }

        fn help_text(&self) -> &'static str {
            "read memory"
        }

        fn execute(&self, out: &mut Vec<String>, args: &[Argument<'_>]) -> bool {
            let Some(address) = args.first().and_then(Argument::as_unsigned) else {
                return false;
            };
            let count = args.get(1).and_then(Argument::as_unsigned).unwrap_or(1);
            out.push(std::format!("{address:#x} x{count}"));
            true
        }
    }

    #[test]
    fn descriptors() {
        assert_eq!(
            ArgSpec::parse("os:command"),
            Some(ArgSpec::optional("command", ArgKind::String))
        );
        assert_eq!(
            ArgSpec::parse("u:address"),
            Some(ArgSpec::required("address", ArgKind::Unsigned))
        );
        assert_eq!(ArgSpec::parse("x:bad"), None);
        assert_eq!(ArgSpec::parse("u:"), None);
        assert_eq!(ArgSpec::parse("uaddress"), None);
        assert_eq!(ArgSpec::parse("o"), None);
        assert_eq!(ArgSpec::parse(""), None);
    }

    #[test]
    fn help_rendering() {
        let rendered: Vec<_> = READ_ARGS.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["<address>", "[count]"]);
    }

    #[test]
    fn alias_lookup() {
        assert_eq!(Read.match_prefix("r"), Some("read"));
        assert_eq!(Read.match_prefix("rh"), Some("rh"));
        assert_eq!(Read.match_prefix("w"), None);
        assert_eq!(Read.arity(), (1, 2));
    }

    #[test]
    fn execute_with_converted_arguments() {
        let mut out = Vec::new();
        assert!(Read.execute(&mut out, &[Argument::Unsigned(0x2000_0000), Argument::Unsigned(4)]));
        assert!(Read.execute(&mut out, &[Argument::Unsigned(0x10)]));
        assert!(!Read.execute(&mut out, &[Argument::String("x")]));
        assert_eq!(out, ["0x20000000 x4", "0x10 x1"]);
        assert_eq!(Argument::String("x").kind(), ArgKind::String);
    }
}
