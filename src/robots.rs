//! robots.txt fetching, parsing, and per-origin caching.
//!
//! The checker owns a process-wide map of origin → parsed ruleset,
//! populated on first query for an origin and kept for the process
//! lifetime. Fetch failures and malformed files fail open: the origin is
//! cached as allow-all so a flaky robots endpoint costs one request, not
//! one per URL.

use crate::urlnorm;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Per-origin robots.txt gate.
pub struct RobotsChecker {
    client: reqwest::Client,
    rules: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsChecker {
    /// The client should carry the crawl user-agent and the (short)
    /// robots fetch timeout.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// May `user_agent` fetch `url`? O(1) after the origin's first query.
    pub async fn can_fetch(&self, user_agent: &str, url: &Url) -> bool {
        let origin = urlnorm::origin(url);
        let target = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };

        {
            let rules = self.rules.lock().await;
            if let Some(ruleset) = rules.get(&origin) {
                return ruleset.allows(user_agent, &target);
            }
        }

        let fetched = Arc::new(self.fetch_rules(&origin).await);
        let mut rules = self.rules.lock().await;
        // First writer wins if another task populated the origin meanwhile.
        let ruleset = rules.entry(origin).or_insert(fetched).clone();
        drop(rules);
        ruleset.allows(user_agent, &target)
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => RobotsRules::parse(&text),
                Err(e) => {
                    debug!(origin, error = %e, "robots.txt body unreadable, failing open");
                    RobotsRules::allow_all()
                }
            },
            Ok(resp) => {
                debug!(origin, status = %resp.status(), "robots.txt not available, failing open");
                RobotsRules::allow_all()
            }
            Err(e) => {
                debug!(origin, error = %e, "robots.txt fetch failed, failing open");
                RobotsRules::allow_all()
            }
        }
    }

    /// Number of origins with cached rulesets.
    pub async fn cached_origins(&self) -> usize {
        self.rules.lock().await.len()
    }
}

/// A parsed robots.txt: groups of agent patterns with allow/deny
/// path-prefix rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsRules {
    groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, PartialEq)]
struct RuleGroup {
    /// Lowercased agent tokens (`*` matches everything).
    agents: Vec<String>,
    rules: Vec<PathRule>,
}

#[derive(Debug, Clone, PartialEq)]
struct PathRule {
    allow: bool,
    path: String,
}

impl RobotsRules {
    /// A ruleset that permits everything (the fail-open default).
    pub fn allow_all() -> Self {
        Self { groups: Vec::new() }
    }

    /// Parse robots.txt content. Unknown directives and junk lines are
    /// ignored; a file of pure junk parses to allow-all.
    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut current: Option<RuleGroup> = None;
        // Consecutive User-agent lines share one group; a User-agent line
        // after rules starts a new group.
        let mut accepting_agents = false;

        for line in text.lines() {
            let line = match line.find('#') {
                Some(i) => &line[..i],
                None => line,
            };
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !accepting_agents {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(RuleGroup {
                            agents: Vec::new(),
                            rules: Vec::new(),
                        });
                        accepting_agents = true;
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    accepting_agents = false;
                    // An empty Disallow means "allow everything": no rule.
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = current.as_mut() {
                        group.rules.push(PathRule {
                            allow: key == "allow",
                            path: value.to_string(),
                        });
                    }
                }
                _ => {
                    accepting_agents = false;
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups }
    }

    /// Evaluate the ruleset: the most specific (longest) matching agent
    /// token selects the applicable groups; within them the longest
    /// matching path rule wins, and an exact-length tie resolves to allow.
    /// No matching rule means allow.
    pub fn allows(&self, user_agent: &str, target: &str) -> bool {
        let ua = user_agent.to_lowercase();

        let mut best_specificity: Option<usize> = None;
        for group in &self.groups {
            for agent in &group.agents {
                let specificity = if agent == "*" {
                    Some(0)
                } else if ua.contains(agent.as_str()) {
                    Some(agent.len())
                } else {
                    None
                };
                if let Some(s) = specificity {
                    if best_specificity.map_or(true, |b| s > b) {
                        best_specificity = Some(s);
                    }
                }
            }
        }
        let Some(best) = best_specificity else {
            return true;
        };

        let mut verdict: Option<(usize, bool)> = None;
        for group in &self.groups {
            let applies = group.agents.iter().any(|a| {
                if a == "*" {
                    best == 0
                } else {
                    ua.contains(a.as_str()) && a.len() == best
                }
            });
            if !applies {
                continue;
            }
            for rule in &group.rules {
                if !target.starts_with(rule.path.as_str()) {
                    continue;
                }
                let len = rule.path.len();
                match verdict {
                    None => verdict = Some((len, rule.allow)),
                    Some((best_len, allow)) => {
                        if len > best_len || (len == best_len && rule.allow && !allow) {
                            verdict = Some((len, rule.allow));
                        }
                    }
                }
            }
        }

        verdict.map_or(true, |(_, allow)| allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_empty_allows_all() {
        let rules = RobotsRules::parse("");
        assert!(rules.allows("bot/1.0", "/anything"));
    }

    #[test]
    fn test_disallow_all() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\n");
        assert!(!rules.allows("bot/1.0", "/"));
        assert!(!rules.allows("bot/1.0", "/page"));
    }

    #[test]
    fn test_disallow_prefix() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /private\n");
        assert!(!rules.allows("bot/1.0", "/private/data"));
        assert!(rules.allows("bot/1.0", "/public"));
    }

    #[test]
    fn test_empty_disallow_allows_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.allows("bot/1.0", "/anything"));
    }

    #[test]
    fn test_longest_path_rule_wins() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /docs\nAllow: /docs/public\n",
        );
        assert!(!rules.allows("bot/1.0", "/docs/internal"));
        assert!(rules.allows("bot/1.0", "/docs/public/page"));
    }

    #[test]
    fn test_tie_resolves_to_allow() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /a\nAllow: /a\n");
        assert!(rules.allows("bot/1.0", "/a/x"));
    }

    #[test]
    fn test_most_specific_agent_wins() {
        let rules = RobotsRules::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: goodbot\nAllow: /\n",
        );
        assert!(rules.allows("goodbot/2.1", "/page"));
        assert!(!rules.allows("otherbot/1.0", "/page"));
    }

    #[test]
    fn test_shared_group_agents() {
        let rules = RobotsRules::parse(
            "User-agent: alpha\nUser-agent: beta\nDisallow: /x\n",
        );
        assert!(!rules.allows("alpha", "/x/1"));
        assert!(!rules.allows("beta", "/x/1"));
        assert!(rules.allows("gamma", "/x/1"));
    }

    #[test]
    fn test_comments_and_junk_ignored() {
        let rules = RobotsRules::parse(
            "# a comment\nUser-agent: * # inline\nDisallow: /secret # hidden\nnot a directive\n",
        );
        assert!(!rules.allows("bot", "/secret/x"));
        assert!(rules.allows("bot", "/open"));
    }

    #[test]
    fn test_malformed_content_fails_open() {
        let rules = RobotsRules::parse("<<<%% binary garbage %%>>>");
        assert!(rules.allows("bot", "/anything"));
    }

    #[tokio::test]
    async fn test_unreachable_origin_fails_open() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let checker = RobotsChecker::new(client);
        // Nothing listens on port 1; connection is refused immediately.
        let url = Url::parse("http://127.0.0.1:1/page").unwrap();
        assert!(checker.can_fetch("bot/1.0", &url).await);
        // The fail-open decision is cached for the origin.
        assert_eq!(checker.cached_origins().await, 1);
        assert!(checker.can_fetch("bot/1.0", &url).await);
        assert_eq!(checker.cached_origins().await, 1);
    }
}
