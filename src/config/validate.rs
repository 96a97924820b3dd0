// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::PortrigConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic — miette-powered validation error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("no services configured")]
    #[diagnostic(
        code(portrig::no_services),
        help("add a [services.<name>] table with `command` and `port`")
    )]
    NoServices {
        #[source_code]
        src: NamedSource<String>,
        #[label("expected at least one service")]
        span: SourceSpan,
    },

    #[error("service `{service}` has an empty command")]
    #[diagnostic(code(portrig::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` uses port 0")]
    #[diagnostic(
        code(portrig::invalid_port),
        help("managed services need a fixed, non-zero port so it can be reclaimed")
    )]
    InvalidPort {
        #[source_code]
        src: NamedSource<String>,
        #[label("port must be between 1 and 65535")]
        span: SourceSpan,
        service: String,
    },

    #[error("port {port} is used by multiple services: {services:?}")]
    #[diagnostic(code(portrig::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        services: Vec<String>,
    },

    #[error("service `{service}` has an empty build command")]
    #[diagnostic(
        code(portrig::empty_build_command),
        help("remove the [services.{service}.build] table if no build is needed")
    )]
    EmptyBuildCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("build command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` has an empty dev marker")]
    #[diagnostic(
        code(portrig::empty_dev_marker),
        help("an empty marker matches every artifact, so every build would be rejected")
    )]
    EmptyDevMarker {
        #[source_code]
        src: NamedSource<String>,
        #[label("empty marker in this list")]
        span: SourceSpan,
        service: String,
    },

    #[error("timing.max_kill_attempts must be at least 1")]
    #[diagnostic(code(portrig::zero_kill_attempts))]
    ZeroKillAttempts {
        #[source_code]
        src: NamedSource<String>,
        #[label("ports could never be reclaimed")]
        span: SourceSpan,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Find the byte offset of a TOML table header like `[services.api]`.
fn find_table_span(source: &str, section: &str, name: &str) -> SourceSpan {
    let patterns = [
        format!("[{}.{}]", section, name),
        format!("[{}.{}", section, name), // nested like [services.api.build]
    ];

    for pat in &patterns {
        if let Some(pos) = source.find(pat) {
            let name_start = pos + 1 + section.len() + 1; // skip '[', section, '.'
            return (name_start, name.len()).into();
        }
    }

    if let Some(pos) = source.find(name) {
        return (pos, name.len()).into();
    }

    (0, 0).into()
}

/// Find the byte offset of a specific field value following a table header.
fn find_field_span(source: &str, header: &str, fallback: SourceSpan, field: &str) -> SourceSpan {
    let Some(search_start) = source.find(header) else {
        return fallback;
    };
    let after_header = &source[search_start..];

    let field_prefix = format!("{} =", field);
    let field_prefix2 = format!("{}=", field);

    for prefix in [&field_prefix, &field_prefix2] {
        if let Some(rel_pos) = after_header.find(prefix.as_str()) {
            let abs_pos = search_start + rel_pos;
            let eq_pos = source[abs_pos..].find('=').map(|p| abs_pos + p + 1);
            if let Some(val_start) = eq_pos {
                let val_trimmed = source[val_start..].trim_start();
                let trim_offset = val_start + (source[val_start..].len() - val_trimmed.len());
                let val_end = val_trimmed.find('\n').unwrap_or(val_trimmed.len());
                return (trim_offset, val_end).into();
            }
        }
    }

    fallback
}

fn find_service_field_span(source: &str, name: &str, field: &str) -> SourceSpan {
    find_field_span(
        source,
        &format!("[services.{}]", name),
        find_table_span(source, "services", name),
        field,
    )
}

fn find_build_field_span(source: &str, name: &str, field: &str) -> SourceSpan {
    find_field_span(
        source,
        &format!("[services.{}.build]", name),
        find_table_span(source, "services", name),
        field,
    )
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

pub fn validate(
    config: &PortrigConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    if config.services.is_empty() {
        errors.push(ConfigDiagnostic::NoServices {
            src: src.clone(),
            span: (0, 0).into(),
        });
    }

    for (name, svc) in &config.services {
        if svc.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_service_field_span(source, name, "command"),
                service: name.clone(),
            });
        }

        if svc.port == 0 {
            errors.push(ConfigDiagnostic::InvalidPort {
                src: src.clone(),
                span: find_service_field_span(source, name, "port"),
                service: name.clone(),
            });
        }

        if let Some(build) = &svc.build {
            if build.command.trim().is_empty() {
                errors.push(ConfigDiagnostic::EmptyBuildCommand {
                    src: src.clone(),
                    span: find_build_field_span(source, name, "command"),
                    service: name.clone(),
                });
            }
            if build.dev_markers.iter().any(|m| m.is_empty()) {
                errors.push(ConfigDiagnostic::EmptyDevMarker {
                    src: src.clone(),
                    span: find_build_field_span(source, name, "dev_markers"),
                    service: name.clone(),
                });
            }
        }
    }

    // Two services on one port would reclaim each other forever.
    let mut port_map: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (name, svc) in &config.services {
        if svc.port != 0 {
            port_map.entry(svc.port).or_default().push(name.clone());
        }
    }
    for (port, services) in port_map {
        if services.len() > 1 {
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_service_field_span(source, &services[1], "port"),
                port,
                services,
            });
        }
    }

    if config.timing.max_kill_attempts == 0 {
        errors.push(ConfigDiagnostic::ZeroKillAttempts {
            src: src.clone(),
            span: find_field_span(source, "[timing]", (0, 0).into(), "max_kill_attempts"),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
