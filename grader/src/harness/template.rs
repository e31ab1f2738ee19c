//! Command template expansion
//!
//! Test commands are shell templates. `$name` references are replaced from a
//! variable table (an escaped `\$name` is left for the shell), and the
//! program under test is marked by `$core_cmd`, which the harness defines as a
//! shell function reporting the wrapped program's own exit status.

use std::collections::HashMap;

use lazy_regex::regex;

/// Name of the shell function wrapping the program under test
pub const CORE_CMD: &str = "core_cmd";

/// Replace `$name` references that appear in `vars`; unknown names stay as is
pub fn expand_vars(template: &str, vars: &HashMap<String, String>) -> String {
    let re = regex!(r"(\\)?\$([A-Za-z0-9_]+)");
    re.replace_all(template, |caps: &regex::Captures| {
        let whole = caps[0].to_string();
        if caps.get(1).is_some() {
            return whole;
        }
        match vars.get(&caps[2]) {
            Some(value) => value.clone(),
            None => whole,
        }
    })
    .into_owned()
}

/// Names of every unescaped `$name` reference, in order of appearance
pub fn referenced_vars(template: &str) -> Vec<String> {
    let re = regex!(r"(\\)?\$([A-Za-z0-9_]+)");
    re.captures_iter(template)
        .filter(|caps| caps.get(1).is_none())
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Number of `$core_cmd` markers in a template
pub fn core_cmd_count(template: &str) -> usize {
    referenced_vars(template)
        .iter()
        .filter(|name| name.as_str() == CORE_CMD)
        .count()
}

/// Insert `$core_cmd` before each executable reference unless the template
/// already marks its wrapped invocation
pub fn make_wrapper_explicit(template: &str, executables: &[String]) -> String {
    if core_cmd_count(template) > 0 || executables.is_empty() {
        return template.to_string();
    }
    let re = regex!(r"(\\)?\$([A-Za-z0-9_]+)");
    re.replace_all(template, |caps: &regex::Captures| {
        let whole = caps[0].to_string();
        if caps.get(1).is_none() && executables.iter().any(|e| e == &caps[2]) {
            format!("${} {}", CORE_CMD, whole)
        } else {
            whole
        }
    })
    .into_owned()
}

/// Command as shown to graders, without the wrapper function
pub fn display_form(expanded: &str) -> String {
    expanded.replace(&format!("{} ", CORE_CMD), "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_expand_known_and_unknown() {
        let table = vars(&[("reverse", "./reverse"), ("core_cmd", "core_cmd")]);
        assert_eq!(
            expand_vars("$core_cmd $reverse < $input", &table),
            "core_cmd ./reverse < $input"
        );
    }

    #[test]
    fn test_escaped_reference_untouched() {
        let table = vars(&[("HOME", "/nowhere")]);
        assert_eq!(expand_vars(r"echo \$HOME $HOME", &table), r"echo \$HOME /nowhere");
    }

    #[test]
    fn test_make_wrapper_explicit_inserts_marker() {
        let exes = vec!["reverse".to_string()];
        assert_eq!(
            make_wrapper_explicit("$reverse words.txt | head -n 3", &exes),
            "$core_cmd $reverse words.txt | head -n 3"
        );
    }

    #[test]
    fn test_make_wrapper_explicit_respects_existing_marker() {
        let exes = vec!["reverse".to_string()];
        let cmd = "echo hi | $core_cmd $reverse";
        assert_eq!(make_wrapper_explicit(cmd, &exes), cmd);
        assert_eq!(make_wrapper_explicit("make clean && make", &exes), "make clean && make");
    }

    #[test]
    fn test_core_cmd_count_and_display() {
        assert_eq!(core_cmd_count("$core_cmd $a && $core_cmd $b"), 2);
        assert_eq!(core_cmd_count(r"\$core_cmd ./a"), 0);
        assert_eq!(display_form("core_cmd ./reverse -n 3"), "./reverse -n 3");
    }
}
