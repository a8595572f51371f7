//! Output parsers for the platform process tools.

/// Pids from `lsof -t`, `fuser` or `pgrep` output: every token that parses
/// as a positive integer, in order, without duplicates.
#[cfg_attr(windows, allow(dead_code))]
pub(crate) fn parse_pid_list(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for token in output.split_whitespace() {
        // fuser appends access-mode letters to each pid ("1234e")
        let digits = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
        if let Ok(pid) = digits.parse::<u32>()
            && pid > 0
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }
    }
    pids
}

/// Pids in `LISTENING` state on the given local port, from `netstat -ano`.
///
/// Expected row shape: `TCP  127.0.0.1:23450  0.0.0.0:0  LISTENING  1234`.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn parse_netstat_listeners(output: &str, port: u16) -> Vec<u32> {
    let wanted = port.to_string();
    let mut pids = Vec::new();

    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let [proto, local, _remote, state, pid] = columns.as_slice() else {
            continue;
        };
        if !proto.eq_ignore_ascii_case("TCP") || !state.eq_ignore_ascii_case("LISTENING") {
            continue;
        }
        let Some((_, local_port)) = local.rsplit_once(':') else {
            continue;
        };
        if local_port != wanted {
            continue;
        }
        if let Ok(pid) = pid.parse::<u32>()
            && pid > 0
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }
    }

    pids
}

/// Why an `lsof` run cannot be trusted, if it cannot.
///
/// lsof exits 1 both when nothing matched and on some errors, so exit 1
/// only counts as a clean "no match" when stderr carries nothing besides
/// its routine `WARNING` lines.
#[cfg_attr(windows, allow(dead_code))]
pub(crate) fn lsof_failure(code: Option<i32>, stderr: &str) -> Option<String> {
    let problem = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.contains("WARNING"));

    match (code, problem) {
        (Some(0), _) | (Some(1), None) => None,
        (Some(1), Some(line)) => Some(line.to_string()),
        (Some(code), problem) => Some(format!(
            "lsof exited with code {code}: {}",
            problem.unwrap_or("no diagnostics")
        )),
        (None, _) => Some("lsof was terminated by a signal".to_string()),
    }
}
