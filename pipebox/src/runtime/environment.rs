//! Pipeline environment with `$VAR` / `${VAR}` interpolation.

/// Ordered key/value environment of a pipeline run.
///
/// Hidden entries take part in interpolation but are only exported by
/// [`Environment::export_all`], so secrets never reach step logs.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: Vec<(String, String)>,
    hidden: Vec<(String, String)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
            hidden: Vec::new(),
        }
    }

    /// Add or replace a variable.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        upsert(&mut self.vars, key.into(), value.into());
    }

    /// Add or replace a variable that is not exported to step output.
    pub fn add_hidden(&mut self, key: impl Into<String>, value: impl Into<String>) {
        upsert(&mut self.hidden, key.into(), value.into());
    }

    /// Look up a variable; visible entries shadow hidden ones.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .chain(self.hidden.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Expand `$VAR` and `${VAR}` references.
    ///
    /// Unknown variables expand to the empty string. A `$` that does not start
    /// a reference is kept as-is.
    pub fn interpolate(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            if let Some(braced) = after.strip_prefix('{') {
                if let Some(end) = braced.find('}') {
                    out.push_str(self.get(&braced[..end]).unwrap_or(""));
                    rest = &braced[end + 1..];
                    continue;
                }
                // Unterminated brace
                out.push('$');
                rest = after;
                continue;
            }

            let name_len = after
                .char_indices()
                .take_while(|(i, c)| is_name_char(*c, *i == 0))
                .count();
            if name_len == 0 {
                out.push('$');
                rest = after;
                continue;
            }

            out.push_str(self.get(&after[..name_len]).unwrap_or(""));
            rest = &after[name_len..];
        }

        out.push_str(rest);
        out
    }

    /// `export KEY="value"` lines for the visible variables.
    pub fn export(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| export_line(k, v)).collect()
    }

    /// `export` lines for visible and hidden variables.
    pub fn export_all(&self) -> Vec<String> {
        self.vars
            .iter()
            .chain(self.hidden.iter())
            .map(|(k, v)| export_line(k, v))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Environment::new();
        for (k, v) in iter {
            env.add(k, v);
        }
        env
    }
}

fn upsert(vars: &mut Vec<(String, String)>, key: String, value: String) {
    match vars.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => vars.push((key, value)),
    }
}

fn is_name_char(c: char, first: bool) -> bool {
    c == '_' || c.is_ascii_alphabetic() || (!first && c.is_ascii_digit())
}

fn export_line(key: &str, value: &str) -> String {
    format!("export {}=\"{}\"", key, value.replace('"', "\\\""))
}
