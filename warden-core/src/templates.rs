//! Attack-type prompt templates.
//!
//! The table is closed: labels are normalized (lowercased, non-letters
//! stripped) and matched exactly, then by substring, then fall back to the
//! generic template.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    Default,
    Xss,
    Sqli,
    AuthBypass,
    SensitiveData,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 5] = [
        TemplateKey::Default,
        TemplateKey::Xss,
        TemplateKey::Sqli,
        TemplateKey::AuthBypass,
        TemplateKey::SensitiveData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::Default => "default",
            TemplateKey::Xss => "xss",
            TemplateKey::Sqli => "sqli",
            TemplateKey::AuthBypass => "authbypass",
            TemplateKey::SensitiveData => "sensitivedata",
        }
    }

    /// Resolve a free-form attack-type label to a table key.
    pub fn resolve(label: &str) -> Self {
        let key = normalize_label(label);

        if let Some(exact) = Self::ALL.iter().find(|k| k.as_str() == key) {
            return *exact;
        }

        if key.contains("xss") {
            TemplateKey::Xss
        } else if key.contains("sql") {
            TemplateKey::Sqli
        } else if key.contains("auth") {
            TemplateKey::AuthBypass
        } else if key.contains("sensitive") {
            TemplateKey::SensitiveData
        } else {
            TemplateKey::Default
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system: &'static str,
    pub user_template: &'static str,
}

/// Lowercase and keep ASCII letters only, so "Sensitive-Data" and
/// "SENSITIVEDATA" land on the same key.
pub fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub fn template_for(key: TemplateKey) -> PromptTemplate {
    match key {
        TemplateKey::Default => PromptTemplate {
            system: "You are an expert penetration tester. Your goal is to generate safe, valid \
                     proof-of-concept exploits to verify security vulnerabilities.\n\
                     You have access to the source code or behavior of a target web application.\n\
                     Output ONLY valid JSON containing the 'payload' and a 'description'.",
            user_template: "Target: {{url}}\n\
                            Context: {{context}}\n\
                            Generate a list of 3 potential payloads.",
        },
        TemplateKey::Xss => PromptTemplate {
            system: "You are an expert in Cross-Site Scripting (XSS).\n\
                     Your goal is to bypass common filters and execute JavaScript.\n\
                     Focus on Polyglots, SVG vectors, and event handlers.\n\
                     Output ONLY valid JSON containing 'payload', 'type' (Reflected/DOM), 'severity' and 'description'.",
            user_template: "Target: {{url}}\n\
                            HTML Context: {{context}}\n\
                            Generate 5 sophisticated XSS payloads that fit this context.",
        },
        TemplateKey::Sqli => PromptTemplate {
            system: "You are an expert in SQL Injection.\n\
                     Your goal is to identify database engines and extract data or bypass authentication.\n\
                     Focus on UNION-based, Error-based, and Boolean-blind techniques.\n\
                     Output ONLY valid JSON containing 'payload', 'db_type' (guess), 'severity' and 'description'.",
            user_template: "Target: {{url}}\n\
                            Input Points: {{context}}\n\
                            Generate 5 SQL injection payloads for testing this input.",
        },
        TemplateKey::AuthBypass => PromptTemplate {
            system: "You are an expert in Authentication Bypass techniques.\n\
                     Your goal is to identify logical flaws, JWT manipulations, or IDORs to bypass authentication.\n\
                     Output ONLY valid JSON containing 'payload', 'technique', 'severity' and 'description'.",
            user_template: "Target: {{url}}\n\
                            Context: {{context}}\n\
                            Generate 3 potential authentication bypass vectors (e.g., manipulated headers, JWT, cookies).",
        },
        TemplateKey::SensitiveData => PromptTemplate {
            system: "You are an expert in identifying Sensitive Data Exposure.\n\
                     Your goal is to find exposed API keys, PII, or configuration files.\n\
                     Output ONLY valid JSON containing 'pattern', 'type', 'severity' and 'description'.",
            user_template: "Target: {{url}}\n\
                            Response Content: {{context}}\n\
                            Analyze for any sensitive data leaks (API keys, emails, secrets).",
        },
    }
}

/// Prompt pair for an attack-type label. Never fails.
pub fn get_template(attack_type: &str) -> PromptTemplate {
    template_for(TemplateKey::resolve(attack_type))
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").unwrap());

/// Replace every `{{key}}` with `data[key]`; missing keys become empty.
pub fn fill_template(template: &str, data: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            data.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
