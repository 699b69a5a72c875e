use super::*;
use crate::process::ToolCommand;
use std::process::Command;

const NDA: &str = "Mutual NDA between {{client.name}} and {{supplier.name}}.\n";

fn resolver(dir: &Path) -> TemplateResolver {
    let cache = ContentCache::init(dir.join("templates")).expect("init cache");
    let git = ToolCommand::parse("git").expect("git command");
    TemplateResolver::new(Some(cache), RepositoryFetcher::new(git, dir.join("repos")))
}

#[test]
fn local_sources_resolve_against_base_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let contract_dir = dir.path().join("acme");
    fs::create_dir_all(&contract_dir).expect("mkdir");
    fs::write(contract_dir.join("nda.html"), NDA).expect("write template");

    let mut resolver = resolver(dir.path());
    let template = resolver
        .load("nda.html", &LoadOptions::new(&contract_dir))
        .expect("load");
    assert_eq!(template.content, NDA);
    assert_eq!(template.content_hash, content_hash(NDA.as_bytes()));
    assert_eq!(template.extension.as_deref(), Some("html"));
    assert_eq!(template.format, TemplateFormat::Mustache);
    assert_eq!(resolver.cache().expect("cache").entry_count(), 0);
}

#[test]
fn wrong_pinned_hash_fails_with_both_hashes() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("nda.html"), NDA).expect("write template");
    let mut options = LoadOptions::new(dir.path());
    options.expected_content_hash = Some("0".repeat(64));

    let err = resolver(dir.path())
        .load("nda.html", &options)
        .expect_err("mismatch");
    match err {
        Error::TemplateHashMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, "0".repeat(64));
            assert_eq!(actual, content_hash(NDA.as_bytes()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn correct_pinned_hash_returns_identical_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("nda.html"), NDA).expect("write template");
    let mut options = LoadOptions::new(dir.path());
    options.expected_content_hash = Some(content_hash(NDA.as_bytes()).to_uppercase());

    let template = resolver(dir.path())
        .load("nda.html", &options)
        .expect("load");
    assert_eq!(template.content, NDA);
}

#[test]
fn missing_local_template_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = resolver(dir.path())
        .load("missing.html", &LoadOptions::new(dir.path()))
        .expect_err("missing");
    assert!(matches!(err, Error::TemplateNotFound { .. }));
}

#[test]
fn cached_remote_source_is_served_without_fetching() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = "https://templates.invalid/nda.html";
    {
        let mut cache = ContentCache::init(dir.path().join("templates")).expect("init cache");
        cache
            .add(
                source,
                NDA,
                CacheMeta {
                    format: Some(TemplateFormat::Handlebars),
                    extension: Some("html".to_string()),
                },
            )
            .expect("add");
    }

    let mut options = LoadOptions::new(dir.path());
    options.expected_content_hash = Some(content_hash(NDA.as_bytes()));
    let template = resolver(dir.path()).load(source, &options).expect("load");
    assert_eq!(template.content, NDA);
    assert_eq!(template.format, TemplateFormat::Handlebars);
    assert_eq!(template.extension.as_deref(), Some("html"));
}

#[test]
fn cached_content_is_still_hash_checked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = "https://templates.invalid/nda.html";
    let mut resolver = resolver(dir.path());
    if let Some(cache) = resolver.cache.as_mut() {
        cache.add(source, NDA, CacheMeta::default()).expect("add");
    }
    let mut options = LoadOptions::new(dir.path());
    options.expected_content_hash = Some(content_hash(b"a different revision"));
    let err = resolver.load(source, &options).expect_err("mismatch");
    assert!(matches!(err, Error::TemplateHashMismatch { .. }));
}

#[test]
fn dangling_cache_entry_is_corruption() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = "https://templates.invalid/nda.html";
    let mut resolver = resolver(dir.path());
    if let Some(cache) = resolver.cache.as_mut() {
        cache.add(source, NDA, CacheMeta::default()).expect("add");
        let path = cache.content_path(cache.get_meta(source).expect("meta"));
        fs::remove_file(path).expect("remove content");
    }
    let err = resolver
        .load(source, &LoadOptions::new(dir.path()))
        .expect_err("corruption");
    assert!(matches!(err, Error::CacheCorruption { .. }));
}

#[test]
fn refresh_bypasses_cache_reads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = "http://127.0.0.1:1/nda.html";
    let mut resolver = resolver(dir.path());
    if let Some(cache) = resolver.cache.as_mut() {
        cache.add(source, NDA, CacheMeta::default()).expect("add");
    }
    let mut options = LoadOptions::new(dir.path());
    options.refresh = true;
    let err = resolver.load(source, &options).expect_err("no server");
    assert!(matches!(err, Error::Fetch { .. }));
}

#[test]
fn template_variables_use_custom_delimiters() {
    let template = Template {
        source: "nda.md".to_string(),
        content: "<<client.name>> and {{ignored}}".to_string(),
        content_hash: String::new(),
        extension: Some("md".to_string()),
        format: TemplateFormat::Mustache,
        custom_delimiters: Some(("<<".to_string(), ">>".to_string())),
    };
    let vars = template.variables();
    assert!(vars.lookup("client.name").is_some());
    assert!(vars.lookup("ignored").is_none());
}

#[test]
fn format_parses_case_insensitively() {
    assert_eq!("Handlebars".parse::<TemplateFormat>(), Ok(TemplateFormat::Handlebars));
    assert!("jinja".parse::<TemplateFormat>().is_err());
}

fn git(cwd: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=Themis", "-c", "user.email=themis@example.com"])
        .args(args)
        .current_dir(cwd)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

/// A git wrapper that clones `upstream` whatever URL it is given and records
/// every invocation in `log`.
fn redirecting_git(dir: &Path, upstream: &Path, log: &Path) -> ToolCommand {
    let script = dir.join("git-wrapper.sh");
    fs::write(
        &script,
        format!(
            "echo \"$*\" >> '{log}'\n\
             if [ \"$1\" = clone ]; then exec git clone -q '{upstream}' \"$3\"; fi\n\
             exec git \"$@\"\n",
            log = log.display(),
            upstream = upstream.display(),
        ),
    )
    .expect("write wrapper");
    ToolCommand::parse(&format!("sh '{}'", script.display())).expect("wrapper command")
}

fn invocations(log: &Path) -> usize {
    fs::read_to_string(log).map_or(0, |text| text.lines().count())
}

#[test]
fn repository_source_is_fetched_cached_and_refreshed() {
    if which::which("git").is_err() || which::which("sh").is_err() {
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let upstream = dir.path().join("upstream");
    fs::create_dir_all(&upstream).expect("mkdir");
    git(&upstream, &["init", "-q", "-b", "main"]);
    fs::write(upstream.join("nda.html"), NDA).expect("write v1");
    git(&upstream, &["add", "."]);
    git(&upstream, &["commit", "-q", "-m", "v1"]);
    git(&upstream, &["tag", "v1"]);
    fs::write(upstream.join("nda.html"), "Revised terms.\n").expect("write v2");
    git(&upstream, &["commit", "-q", "-am", "v2"]);

    let log = dir.path().join("git.log");
    let git_tool = redirecting_git(dir.path(), &upstream, &log);
    let cache = ContentCache::init(dir.path().join("templates")).expect("init cache");
    let mut resolver =
        TemplateResolver::new(Some(cache), RepositoryFetcher::new(git_tool, dir.path().join("repos")));

    let source = "git://example.invalid:org/repo.git/nda.html#v1";
    let mut options = LoadOptions::new(dir.path());
    options.expected_content_hash = Some(content_hash(NDA.as_bytes()));

    let first = resolver.load(source, &options).expect("first load");
    assert_eq!(first.content, NDA);
    assert_eq!(first.extension.as_deref(), Some("html"));
    let cache = resolver.cache().expect("cache");
    assert!(cache.has(source));
    assert_eq!(cache.get_content(source).expect("get").as_deref(), Some(NDA));
    let calls = invocations(&log);
    assert!(calls > 0);

    let second = resolver.load(source, &options).expect("cached load");
    assert_eq!(second.content, NDA);
    assert_eq!(second.extension.as_deref(), Some("html"));
    assert_eq!(invocations(&log), calls, "cached load must not touch git");

    options.refresh = true;
    let refreshed = resolver.load(source, &options).expect("refreshed load");
    assert_eq!(refreshed.content, NDA);
    assert!(invocations(&log) > calls);
    let log_text = fs::read_to_string(&log).expect("read log");
    assert!(log_text.contains("pull --all"));
    assert_eq!(
        log_text.lines().filter(|line| line.starts_with("clone ")).count(),
        1
    );
}
