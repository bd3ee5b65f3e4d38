//! Module membership for test names.
//!
//! A name belongs to a module when it is in that module's allowlist (test
//! functions discovered in its source files). Without an allowlist, a
//! per-module keyword rule decides. Both paths are pure with respect to
//! the registry state, so repeated calls agree.

pub mod allowlist;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::config::AppConfig;
use crate::modules::Module;

/// Lower-cased test name split into `_`-separated tokens.
pub struct NameParts {
    lower: String,
    tokens: Vec<String>,
}

impl NameParts {
    pub fn new(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        let tokens = lower
            .split('_')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { lower, tokens }
    }

    /// Substring test on the lower-cased name.
    pub fn has(&self, needle: &str) -> bool {
        self.lower.contains(needle)
    }

    /// Whole-token test, e.g. `t1` in `test_t1_login` but not in `test_t10`.
    pub fn token(&self, t: &str) -> bool {
        self.tokens.iter().any(|x| x == t)
    }

    fn any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.has(n))
    }
}

type Rule = fn(&NameParts) -> bool;

/// Keyword rule per module; consulted only when no allowlist exists.
const STRATEGIES: [(Module, Rule); 5] = [
    (Module::BenchsaleAdmin, benchsale_admin),
    (Module::BenchsaleRecruiter, benchsale_recruiter),
    (Module::BenchsaleTest, benchsale_combined),
    (Module::Employer, employer),
    (Module::Jobseeker, jobseeker),
];

const EMPLOYER_ACTIONS: &[&str] = &[
    "shortlisting",
    "applicant",
    "closing",
    "post_a_job",
    "hotlist",
    "hot_list",
];

/// Names clearly owned by the Employer or JobSeeker suites.
fn foreign_to_benchsale(n: &NameParts) -> bool {
    n.any(&["employer", "jobseeker", "db_solr_sync"]) || n.token("js") || n.token("emp")
}

fn benchsale_admin(n: &NameParts) -> bool {
    !foreign_to_benchsale(n) && (n.token("t1") || n.has("admin"))
}

fn benchsale_recruiter(n: &NameParts) -> bool {
    !foreign_to_benchsale(n) && (n.token("t2") || n.has("recruiter"))
}

fn benchsale_combined(n: &NameParts) -> bool {
    benchsale_admin(n) || benchsale_recruiter(n)
}

/// Owned by a BenchSale suite regardless of other keywords.
fn benchsale_owned(n: &NameParts) -> bool {
    n.has("benchsale") || ((n.has("admin") || n.has("recruiter")) && (n.token("t1") || n.token("t2")))
}

fn employer(n: &NameParts) -> bool {
    if benchsale_owned(n) || n.has("db_solr_sync") || n.has("js_from") {
        return false;
    }
    // Employer posting verified from the jobseeker side.
    if n.has("job_posting_displayed_in_js") || n.any(EMPLOYER_ACTIONS) {
        return true;
    }
    if n.has("js_dashboard") {
        if n.has("verification") || n.has("displayed") {
            return true;
        }
        if n.has("jobseeker") {
            return false;
        }
    }
    if n.has("employer") || n.token("emp") {
        return true;
    }
    if n.has("jobseeker") || n.token("js") {
        return false;
    }
    // Ambiguous names lean towards Employer.
    true
}

fn jobseeker(n: &NameParts) -> bool {
    if benchsale_owned(n) || n.has("admin") || n.has("recruiter") {
        return false;
    }
    if n.has("hotlist") || n.has("job_posting_displayed_in_js") || n.any(EMPLOYER_ACTIONS) {
        return false;
    }
    if (n.has("employer") || n.token("emp")) && !n.has("js_dashboard") && !n.has("jobseeker") {
        return false;
    }
    if n.token("js") || n.has("jobseeker") || n.has("db_solr_sync") {
        return true;
    }
    // Ambiguous names stay out of JobSeeker.
    false
}

/// Keyword-only membership, ignoring any allowlist.
pub fn heuristic_belongs(name: &str, module: Module) -> bool {
    let parts = NameParts::new(name);
    STRATEGIES
        .iter()
        .find(|(m, _)| *m == module)
        .map(|(_, rule)| rule(&parts))
        .unwrap_or(false)
}

/// Process-wide classifier state: source file layout plus cached allowlists.
#[derive(Debug)]
pub struct Registry {
    sources: HashMap<Module, Vec<PathBuf>>,
    cache: RwLock<HashMap<Module, Arc<BTreeSet<String>>>>,
}

impl Registry {
    pub fn new(sources: HashMap<Module, Vec<PathBuf>>) -> Self {
        Self {
            sources,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let sources = Module::ALL
            .into_iter()
            .map(|m| (m, config.test_file_paths(m)))
            .collect();
        Self::new(sources)
    }

    /// Test functions discovered in the module's sources, possibly empty.
    pub fn allowlist(&self, module: Module) -> Arc<BTreeSet<String>> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&module) {
                return Arc::clone(hit);
            }
        }

        let files = self.sources.get(&module).map(Vec::as_slice).unwrap_or(&[]);
        let names = Arc::new(allowlist::discover(files));
        debug!(module = %module, tests = names.len(), "built allowlist");

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(cache.entry(module).or_insert(names))
    }

    pub fn belongs(&self, name: &str, module: Module) -> bool {
        let allow = self.allowlist(module);
        if allow.is_empty() {
            heuristic_belongs(name, module)
        } else {
            allow.contains(name)
        }
    }

    /// Drop cached allowlists so the next lookup rescans the sources.
    pub fn reset(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
