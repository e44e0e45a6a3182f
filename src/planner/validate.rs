//! Argv shell-injection validation (§4.5 "Argv validation"). The runner
//! spawns the codec tool directly via `std::process::Command`, never through
//! a shell, so there is no shell-expansion risk from argv contents alone —
//! this validator exists to catch planner bugs that might otherwise hand the
//! tool a filter-graph string smuggling a flag injection, and to document the
//! one legitimate place these characters are allowed: inside a filter-graph
//! argument.

const DANGEROUS_TOKENS: &[&str] = &[";", ">", "<", "|", "&&", "||", "`", "$"];

const FILTER_GRAPH_FLAGS: &[&str] = &["-vf", "-af", "-filter_complex", "-filter:v", "-filter:a"];

/// Validates an assembled argv. Returns `Err` naming the offending argument
/// if a dangerous token appears outside a filter-graph argument. The
/// filter-graph whitelist ends at the next argv entry that *begins* with
/// `-`, including when the filter-graph argument is argv's last entry before
/// the output path (§9's explicit resolution of this open question).
pub fn validate_argv(argv: &[String]) -> Result<(), String> {
    let mut in_filter_graph_at: Option<usize> = None;

    for (index, arg) in argv.iter().enumerate() {
        if let Some(start) = in_filter_graph_at {
            if index > start && arg.starts_with('-') {
                in_filter_graph_at = None;
            }
        }

        let is_whitelisted = in_filter_graph_at.is_some();

        if !is_whitelisted {
            for token in DANGEROUS_TOKENS {
                if arg.contains(token) {
                    return Err(format!(
                        "argument {index} (\"{arg}\") contains disallowed token \"{token}\" outside a filter-graph argument"
                    ));
                }
            }
        }

        if FILTER_GRAPH_FLAGS.contains(&arg.as_str()) {
            in_filter_graph_at = Some(index + 1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_dangerous_token_outside_filter_graph() {
        let v = argv(&["-i", "in.mp4; rm -rf /", "-c:v", "libx264", "out.mp4"]);
        assert!(validate_argv(&v).is_err());
    }

    #[test]
    fn allows_dangerous_tokens_inside_filter_graph() {
        let v = argv(&[
            "-i",
            "in.mp4",
            "-vf",
            "scale=640:-1,format=yuv420p",
            "-c:v",
            "libx264",
            "out.mp4",
        ]);
        assert!(validate_argv(&v).is_ok());
    }

    #[test]
    fn filter_graph_as_last_argument_before_output_is_whitelisted() {
        let v = argv(&["-i", "in.mp4", "-filter_complex", "[0:v]scale=640:-1[v]"]);
        assert!(validate_argv(&v).is_ok());
    }

    #[test]
    fn filter_graph_scope_ends_at_next_flag() {
        let v = argv(&[
            "-filter_complex",
            "[0:v]scale=640:-1[v]",
            "-map",
            "out|put.mp4",
        ]);
        assert!(validate_argv(&v).is_err());
    }
}
