//! Turns a user-supplied source reference into a local directory root.
//!
//! Two variants, tried in a fixed order: a reference that already exists
//! on the filesystem is always `Local`, even if it happens to also parse
//! as `host/user/repo`; otherwise `Remote` is tried.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use git2::build::RepoBuilder;
use git2::{FetchOptions, Repository};
use regex::Regex;

use crate::error::{DoctalkError, Result};

const CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub trait SourceResolver {
    fn validate(&self, reference: &str) -> bool;
    fn resolve(&self, reference: &str) -> Result<PathBuf>;
}

/// A local filesystem path, used unchanged.
pub struct LocalResolver;

impl SourceResolver for LocalResolver {
    fn validate(&self, reference: &str) -> bool {
        Path::new(reference).exists()
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let path = PathBuf::from(reference);
        if !path.exists() {
            return Err(DoctalkError::PathMissing(path));
        }
        Ok(path)
    }
}

struct RemoteRef {
    host: String,
    user: String,
    repo: String,
    branch: Option<String>,
    subpath: Option<String>,
}

fn remote_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?P<host>[^/]+)/(?P<user>[^/]+)/(?P<repo>[^/]+?)(?:/tree/(?P<branch>[^/]+))?(?:/(?P<subpath>.+))?$").unwrap()
    })
}

fn parse_remote_ref(reference: &str) -> Option<RemoteRef> {
    let caps = remote_regex().captures(reference)?;
    Some(RemoteRef {
        host: caps.name("host")?.as_str().to_string(),
        user: caps.name("user")?.as_str().to_string(),
        repo: caps.name("repo")?.as_str().trim_end_matches(".git").to_string(),
        branch: caps.name("branch").map(|m| m.as_str().to_string()),
        subpath: caps.name("subpath").map(|m| m.as_str().to_string()),
    })
}

/// Clones/updates shallow working trees into a process-injected cache
/// root, keyed by `user_repo_branch`. The cache root is a constructor
/// parameter rather than a hard-coded `~/...` literal so tests can point
/// it at a temp directory.
pub struct RemoteResolver {
    cache_root: PathBuf,
}

impl RemoteResolver {
    /// Creates the resolver and sweeps cache entries whose `.last_access`
    /// sidecar is missing or older than 30 days.
    pub fn new(cache_root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_root)?;
        gc_stale_caches(&cache_root)?;
        Ok(Self { cache_root })
    }

    fn cache_key(r: &RemoteRef) -> String {
        let branch = r.branch.as_deref().unwrap_or("default");
        format!("{}_{}_{}", r.user, r.repo, branch)
    }

    fn clone_url(r: &RemoteRef) -> String {
        format!("https://{}/{}/{}.git", r.host, r.user, r.repo)
    }
}

impl SourceResolver for RemoteResolver {
    fn validate(&self, reference: &str) -> bool {
        parse_remote_ref(reference).is_some()
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let parsed = parse_remote_ref(reference)
            .ok_or_else(|| DoctalkError::UnresolvableReference(reference.to_string()))?;

        let dest = self.cache_root.join(Self::cache_key(&parsed));

        if dest.join(".git").exists() {
            update_working_tree(&dest, parsed.branch.as_deref())
                .map_err(|source| DoctalkError::RemoteFetchFailed { reference: reference.to_string(), source })?;
        } else {
            clone_shallow(&Self::clone_url(&parsed), &dest, parsed.branch.as_deref(), parsed.subpath.as_deref())
                .map_err(|source| DoctalkError::RemoteFetchFailed { reference: reference.to_string(), source })?;
        }

        touch_last_access(&dest)?;

        let root = match &parsed.subpath {
            Some(sub) => dest.join(sub),
            None => dest,
        };
        if !root.exists() {
            return Err(DoctalkError::PathMissing(root));
        }
        Ok(root)
    }
}

fn clone_shallow(url: &str, dest: &Path, branch: Option<&str>, subpath: Option<&str>) -> std::result::Result<(), git2::Error> {
    let mut fetch_opts = FetchOptions::new();
    fetch_opts.depth(1);

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_opts);
    if let Some(branch) = branch {
        builder.branch(branch);
    }

    let repo = builder.clone(url, dest)?;

    if let Some(subpath) = subpath {
        let mut config = repo.config()?;
        config.set_bool("core.sparseCheckout", true)?;
        let sparse_file = repo.path().join("info/sparse-checkout");
        if let Some(parent) = sparse_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::write(&sparse_file, format!("{subpath}/*\n"));
    }

    Ok(())
}

fn update_working_tree(dest: &Path, branch: Option<&str>) -> std::result::Result<(), git2::Error> {
    let repo = Repository::open(dest)?;
    let mut remote = repo.find_remote("origin")?;
    let mut fetch_opts = FetchOptions::new();
    fetch_opts.depth(1);
    let refspec = branch.map(|b| format!("refs/heads/{b}"));
    let refs: &[&str] = match &refspec {
        Some(r) => &[r.as_str()],
        None => &[],
    };
    remote.fetch(refs, Some(&mut fetch_opts), None)?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let commit = repo.reference_to_annotated_commit(&fetch_head)?;
    repo.set_head_detached(commit.id())?;
    repo.checkout_head(None)?;
    Ok(())
}

fn touch_last_access(dest: &Path) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    fs::write(dest.join(".last_access"), now)?;
    Ok(())
}

fn gc_stale_caches(cache_root: &Path) -> Result<()> {
    let Ok(entries) = fs::read_dir(cache_root) else { return Ok(()) };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let sidecar = path.join(".last_access");
        let stale = match fs::metadata(&sidecar) {
            Ok(meta) => meta
                .modified()
                .map(|m| SystemTime::now().duration_since(m).unwrap_or_default() > CACHE_TTL)
                .unwrap_or(true),
            Err(_) => true,
        };
        if stale {
            let _ = fs::remove_dir_all(&path);
        }
    }
    Ok(())
}

/// Resolve a reference by trying each resolver in order; the first
/// accepting `validate` wins.
pub fn resolve_reference(reference: &str, remote: &RemoteResolver) -> Result<PathBuf> {
    let local = LocalResolver;
    if local.validate(reference) {
        return local.resolve(reference);
    }
    if remote.validate(reference) {
        return remote.resolve(reference);
    }
    Err(DoctalkError::UnresolvableReference(reference.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_user_repo_tree_branch_subpath() {
        let r = parse_remote_ref("https://github.com/u/r/tree/main/sub").unwrap();
        assert_eq!(r.host, "github.com");
        assert_eq!(r.user, "u");
        assert_eq!(r.repo, "r");
        assert_eq!(r.branch.as_deref(), Some("main"));
        assert_eq!(r.subpath.as_deref(), Some("sub"));
    }

    #[test]
    fn parses_bare_host_user_repo() {
        let r = parse_remote_ref("github.com/u/r").unwrap();
        assert_eq!(r.branch, None);
        assert_eq!(r.subpath, None);
    }

    #[test]
    fn local_path_takes_precedence_over_remote_parse() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalResolver;
        assert!(local.validate(dir.path().to_str().unwrap()));
    }

    #[test]
    fn cache_key_combines_user_repo_branch() {
        let r = parse_remote_ref("github.com/u/r/tree/main").unwrap();
        assert_eq!(RemoteResolver::cache_key(&r), "u_r_main");
    }

    #[test]
    fn stale_cache_without_sidecar_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let stale_entry = cache_root.join("u_r_main");
        fs::create_dir_all(&stale_entry).unwrap();
        // No .last_access sidecar — treated as stale.
        gc_stale_caches(&cache_root).unwrap();
        assert!(!stale_entry.exists());
    }
}
