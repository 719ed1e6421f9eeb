//! Minimal Dockerfile parser.
//!
//! The generation pipeline only needs the parts of a Dockerfile that shape the
//! object graph: the base image of the first stage, declared ports and
//! environment. Everything else is kept as an opaque instruction so the raw
//! content can be embedded into a build specification unchanged.

use crate::error::{ForgeError, Result};
use crate::reference::ImageReference;

/// A parsed Dockerfile.
#[derive(Debug, Clone, PartialEq)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
}

/// A single Dockerfile instruction.
///
/// Only the instructions the pipeline inspects get structure; the rest are
/// carried through as `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// FROM base image (stage references and `scratch` keep the raw string).
    From { image: String },

    /// ENV key=value pairs.
    Env { vars: Vec<(String, String)> },

    /// EXPOSE port[/protocol] list; protocols are dropped.
    Expose { ports: Vec<u16> },

    /// Any other instruction, kept verbatim.
    Other { keyword: String, args: String },
}

impl Dockerfile {
    /// Parse Dockerfile content.
    ///
    /// Handles comments and backslash line continuations the way the docker
    /// builder does. An empty Dockerfile parses successfully; the caller
    /// decides whether a missing FROM is an error.
    pub fn parse(content: &str) -> Result<Dockerfile> {
        let mut instructions = Vec::new();

        for line in logical_lines(content) {
            let (keyword, args) = match line.split_once(char::is_whitespace) {
                Some((k, a)) => (k.to_uppercase(), a.trim().to_string()),
                None => (line.to_uppercase(), String::new()),
            };

            let instruction = match keyword.as_str() {
                "FROM" => parse_from(&args)?,
                "ENV" => parse_env(&args)?,
                "EXPOSE" => parse_expose(&args)?,
                _ => Instruction::Other { keyword, args },
            };
            instructions.push(instruction);
        }

        Ok(Dockerfile { instructions })
    }

    /// The base image of the first stage, if any FROM instruction exists.
    pub fn base_image(&self) -> Option<&str> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::From { image } => Some(image.as_str()),
            _ => None,
        })
    }

    /// The base image parsed as an image reference.
    pub fn base_image_reference(&self) -> Result<Option<ImageReference>> {
        match self.base_image() {
            Some(image) => ImageReference::parse(image).map(Some),
            None => Ok(None),
        }
    }

    /// All ports declared by EXPOSE instructions, in declaration order.
    pub fn exposed_ports(&self) -> Vec<u16> {
        self.instructions
            .iter()
            .flat_map(|i| match i {
                Instruction::Expose { ports } => ports.clone(),
                _ => Vec::new(),
            })
            .collect()
    }
}

/// Split content into logical lines: strip comments and blank lines, join
/// backslash continuations.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        let stripped = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let trimmed = stripped.trim();
        if trimmed.is_empty() && current.is_empty() {
            continue;
        }

        let piece = trimmed.trim_end_matches('\\').trim();
        if !piece.is_empty() {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(piece);
        }

        if !trimmed.ends_with('\\') && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn parse_from(args: &str) -> Result<Instruction> {
    // FROM [--platform=...] <image> [AS <name>]
    let mut parts = args.split_whitespace().filter(|p| !p.starts_with("--platform="));
    let image = parts.next().ok_or_else(|| ForgeError::InvalidDockerfile {
        reason: "FROM instruction requires an image reference".to_string(),
    })?;
    Ok(Instruction::From { image: image.to_string() })
}

fn parse_env(args: &str) -> Result<Instruction> {
    if args.is_empty() {
        return Err(ForgeError::InvalidDockerfile {
            reason: "ENV requires at least one key=value pair".to_string(),
        });
    }

    let mut vars = Vec::new();
    if args.split_whitespace().next().is_some_and(|first| first.contains('=')) {
        for pair in args.split_whitespace() {
            if let Some((key, value)) = pair.split_once('=') {
                vars.push((key.to_string(), value.to_string()));
            }
        }
    } else {
        // Legacy `ENV key value` form carries exactly one variable.
        let (key, value) =
            args.split_once(char::is_whitespace).ok_or_else(|| ForgeError::InvalidDockerfile {
                reason: "ENV requires a value".to_string(),
            })?;
        vars.push((key.to_string(), value.trim().to_string()));
    }
    Ok(Instruction::Env { vars })
}

fn parse_expose(args: &str) -> Result<Instruction> {
    let mut ports = Vec::new();
    for spec in args.split_whitespace() {
        let port_str = spec.split('/').next().unwrap_or(spec);
        let port = port_str.parse::<u16>().map_err(|_| ForgeError::InvalidDockerfile {
            reason: format!("invalid port number {:?} in EXPOSE", port_str),
        })?;
        ports.push(port);
    }
    Ok(Instruction::Expose { ports })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_image() {
        let df = Dockerfile::parse("FROM example/origin:v1.0.6\nUSER foo").unwrap();
        assert_eq!(df.base_image(), Some("example/origin:v1.0.6"));

        let r = df.base_image_reference().unwrap().unwrap();
        assert_eq!(r.namespace.as_deref(), Some("example"));
        assert_eq!(r.name, "origin");
        assert_eq!(r.tag.as_deref(), Some("v1.0.6"));
    }

    #[test]
    fn test_parse_no_from() {
        let df = Dockerfile::parse("USER foo").unwrap();
        assert_eq!(df.base_image(), None);
    }

    #[test]
    fn test_parse_expose() {
        let df = Dockerfile::parse("FROM centos\nEXPOSE 80 443/tcp 53/udp").unwrap();
        assert_eq!(df.exposed_ports(), vec![80, 443, 53]);
    }

    #[test]
    fn test_parse_env_forms() {
        let df = Dockerfile::parse("FROM centos\nENV A=1 B=2\nENV KEY some value").unwrap();
        let env: Vec<_> = df
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Env { vars } => Some(vars.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(
            env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string()),
                ("KEY".to_string(), "some value".to_string()),
            ]
        );
    }

    #[test]
    fn test_line_continuation_and_comments() {
        let content = "# build\nFROM alpine:3.19\nRUN apk add --no-cache \\\n    nginx \\\n    curl\n";
        let df = Dockerfile::parse(content).unwrap();
        assert_eq!(df.instructions.len(), 2);
        assert_eq!(
            df.instructions[1],
            Instruction::Other {
                keyword: "RUN".to_string(),
                args: "apk add --no-cache nginx curl".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_expose_port() {
        assert!(Dockerfile::parse("FROM centos\nEXPOSE eighty").is_err());
    }
}
