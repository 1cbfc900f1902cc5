//! Backend preferences and their cross-product expansion.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Preference key holding the engine-side time budget.
pub const TIMEOUT_KEY: &str = "TIME_OUT";

/// Largest number of non-timeout preferences a cross-product may range over.
pub const MAX_CROSS_PREFERENCES: usize = 20;

/// One `KEY=VALUE` engine preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    pub value: String,
}

impl Preference {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.key.eq_ignore_ascii_case(TIMEOUT_KEY)
    }
}

impl FromStr for Preference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("'{s}' is not of the form KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("'{s}' has an empty key"));
        }
        Ok(Self::new(key, value.trim()))
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Expand a flat preference list into backend configurations.
///
/// Without `cross` the list is returned as the single configuration.
/// With `cross`, every subset of the non-timeout preferences is combined
/// with each timeout value given (or with none if no timeout is given), so
/// each configuration holds exactly one timeout when any was supplied.
/// Configurations come out largest subset first and without duplicates.
pub fn expand_preferences(
    preferences: &[Preference],
    cross: bool,
) -> Result<Vec<Vec<Preference>>, String> {
    if !cross {
        return Ok(vec![preferences.to_vec()]);
    }

    let (timeouts, others): (Vec<&Preference>, Vec<&Preference>) =
        preferences.iter().partition(|p| p.is_timeout());
    let mut timeouts: Vec<Option<&Preference>> = timeouts
        .into_iter()
        .collect::<IndexSet<_>>()
        .into_iter()
        .map(Some)
        .collect();
    let others: Vec<&Preference> = others
        .into_iter()
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect();
    if timeouts.is_empty() {
        timeouts.push(None);
    }

    if others.len() > MAX_CROSS_PREFERENCES {
        return Err(format!(
            "cross-product over {} preferences is too large (limit {MAX_CROSS_PREFERENCES})",
            others.len()
        ));
    }

    // Timeouts and others are distinct, so every (timeout, mask) pair
    // already yields a distinct configuration.
    let full: u32 = (1u32 << others.len()) - 1;
    let mut configurations: Vec<Vec<Preference>> =
        Vec::with_capacity(timeouts.len() * (full as usize + 1));
    for timeout in &timeouts {
        for mask in (0..=full).rev() {
            let mut config: Vec<Preference> = timeout.iter().map(|t| (*t).clone()).collect();
            config.extend(
                others
                    .iter()
                    .enumerate()
                    .filter(|(bit, _)| mask & (1 << bit) != 0)
                    .map(|(_, p)| (*p).clone()),
            );
            configurations.push(config);
        }
    }

    Ok(configurations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(list: &[&str]) -> Vec<Preference> {
        list.iter().map(|p| p.parse().unwrap()).collect()
    }

    #[test]
    fn parses_and_displays() {
        let p: Preference = " MAXINT = 17 ".parse().unwrap();
        assert_eq!(p, Preference::new("MAXINT", "17"));
        assert_eq!(p.to_string(), "MAXINT=17");
        assert!("MAXINT".parse::<Preference>().is_err());
        assert!("=3".parse::<Preference>().is_err());
        assert!("time_out=1".parse::<Preference>().unwrap().is_timeout());
    }

    #[test]
    fn timeout_is_never_dropped() {
        let configs = expand_preferences(&prefs(&["TIME_OUT=3000", "MAXINT=17"]), true).unwrap();
        assert_eq!(
            configs,
            vec![
                prefs(&["TIME_OUT=3000", "MAXINT=17"]),
                prefs(&["TIME_OUT=3000"]),
            ]
        );
    }

    #[test]
    fn without_cross_list_is_kept() {
        let input = prefs(&["TIME_OUT=3000", "MAXINT=17"]);
        assert_eq!(expand_preferences(&input, false).unwrap(), vec![input]);
    }

    #[test]
    fn degenerate_cases() {
        assert_eq!(expand_preferences(&[], true).unwrap(), vec![Vec::new()]);
        assert_eq!(
            expand_preferences(&prefs(&["TIME_OUT=1", "TIME_OUT=2"]), true).unwrap(),
            vec![prefs(&["TIME_OUT=1"]), prefs(&["TIME_OUT=2"])]
        );
    }

    #[test]
    fn crosses_every_subset_with_every_timeout() {
        let configs = expand_preferences(
            &prefs(&["A=1", "TIME_OUT=10", "B=2", "TIME_OUT=20", "C=3"]),
            true,
        )
        .unwrap();
        assert_eq!(configs.len(), 2 * 8);
        assert!(configs.iter().all(|c| c.iter().filter(|p| p.is_timeout()).count() == 1));
        assert!(configs.contains(&prefs(&["TIME_OUT=20", "A=1", "C=3"])));
        assert!(configs.contains(&prefs(&["TIME_OUT=10"])));
    }

    #[test]
    fn duplicates_collapse() {
        let configs = expand_preferences(&prefs(&["A=1", "A=1"]), true).unwrap();
        assert_eq!(configs, vec![prefs(&["A=1"]), Vec::new()]);
    }

    #[test]
    fn large_cross_products_expand_quickly() {
        let mut many: Vec<Preference> = (0..16)
            .map(|i| Preference::new(format!("P{i}"), "1"))
            .collect();
        many.push(Preference::new(TIMEOUT_KEY, "100"));

        let start = std::time::Instant::now();
        let configs = expand_preferences(&many, true).unwrap();
        assert_eq!(configs.len(), 1 << 16);
        assert!(start.elapsed() < std::time::Duration::from_secs(5));

        let distinct: IndexSet<&Vec<Preference>> = configs.iter().collect();
        assert_eq!(distinct.len(), configs.len());
    }

    #[test]
    fn oversized_cross_product_is_rejected() {
        let many: Vec<Preference> = (0..=MAX_CROSS_PREFERENCES)
            .map(|i| Preference::new(format!("P{i}"), "1"))
            .collect();
        assert!(expand_preferences(&many, true).is_err());
    }
}
