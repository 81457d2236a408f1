use corral_core::channel::ChannelPriority;
use corral_core::config::SolveStrategy;
use corral_core::record::PackageRecord;
use corral_core::spec::MatchSpec;
use corral_core::version::Version;
use corral_solver::policy::DefaultOrdering;
use corral_solver::{
    compile, is_satisfiable, solve, CompileContext, Constraint, ConstraintKind, Intent, RepositoryIndex,
    RequestFlags, SolveError, SolveOptions, SolverRequest,
};

fn rec(name: &str, version: &str, depends: &[&str]) -> PackageRecord {
    PackageRecord::new(name, Version::parse(version).unwrap(), "0")
        .with_channel("main", 1)
        .with_depends(depends.iter().map(|d| MatchSpec::parse(d).unwrap()).collect())
}

fn specs(items: &[&str]) -> Vec<MatchSpec> {
    items.iter().map(|s| MatchSpec::parse(s).unwrap()).collect()
}

fn index(records: Vec<PackageRecord>) -> RepositoryIndex {
    RepositoryIndex::new(records, ChannelPriority::Strict)
}

fn scientific_index() -> RepositoryIndex {
    index(vec![
        rec("python", "3.10.4", &[]),
        rec("python", "3.11.2", &[]),
        rec("python", "3.12.0", &[]),
        rec("numpy", "1.24.0", &["python >=3.8,<3.12"]),
        rec("numpy", "1.26.4", &["python >=3.9,<3.13"]),
        rec("numpy", "2.0.0", &["python >=3.10,<3.13", "libblas >=3.9"]),
        rec("libblas", "3.9.0", &[]),
        rec("libblas", "3.8.0", &[]),
        rec("scipy", "1.11.0", &["numpy >=1.22,<1.27", "python >=3.9"]),
        rec("scipy", "1.13.0", &["numpy >=1.23,<2.1", "python >=3.10", "libblas <3.9"]),
        rec("pandas", "2.1.0", &["numpy >=1.23", "python"]),
    ])
}

fn assert_valid(solution: &corral_solver::Solution, request: &[MatchSpec]) {
    for spec in request {
        let record = solution.get(&spec.name).unwrap_or_else(|| panic!("{} missing", spec.name));
        assert!(spec.matches(record), "{record} does not satisfy {spec}");
    }
    for record in solution.records() {
        for dep in &record.depends {
            let chosen = solution
                .get(&dep.name)
                .unwrap_or_else(|| panic!("{record} needs {dep} which is missing"));
            assert!(dep.matches(chosen), "{record} needs {dep}, got {chosen}");
        }
        for con in &record.constrains {
            if let Some(chosen) = solution.get(&con.name) {
                assert!(con.matches(chosen), "{record} constrains {con}, got {chosen}");
            }
        }
    }
}

#[test]
fn solution_covers_request_with_one_record_per_name() {
    let index = scientific_index();
    let request = specs(&["scipy", "pandas"]);
    let solution = solve(&index, &SolverRequest::new(request.clone()), &SolveOptions::default()).unwrap();
    assert_valid(&solution, &request);

    let names: Vec<&str> = solution.names().collect();
    assert_eq!(names, vec!["libblas", "numpy", "pandas", "python", "scipy"]);
    assert_eq!(solution.get("scipy").unwrap().version.as_str(), "1.13.0");
    assert_eq!(solution.get("libblas").unwrap().version.as_str(), "3.8.0");
    assert_eq!(solution.get("numpy").unwrap().version.as_str(), "1.26.4");
}

#[test]
fn identical_inputs_give_identical_results() {
    let index = scientific_index();
    let request = SolverRequest::new(specs(&["scipy", "pandas", "python 3.11.*"]));
    let first = solve(&index, &request, &SolveOptions::default()).unwrap();
    for _ in 0..5 {
        assert_eq!(solve(&index, &request, &SolveOptions::default()).unwrap(), first);
    }
}

#[test]
fn resolving_the_solution_is_idempotent() {
    let index = scientific_index();
    let explicit = specs(&["scipy", "pandas"]);
    let first = solve(&index, &SolverRequest::new(explicit.clone()), &SolveOptions::default()).unwrap();

    let installed = first.clone().into_records();
    let request = SolverRequest::new(explicit).with_installed(installed);
    let second = solve(&index, &request, &SolveOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn installed_version_is_kept_unless_updating() {
    let index = index(vec![rec("pkg-a", "1.0", &[]), rec("pkg-a", "2.0", &[])]);
    let installed = vec![rec("pkg-a", "1.0", &[])];

    let keep = compile(
        &[Intent::Install("pkg-a>=1.0".into())],
        &installed,
        &[],
        &CompileContext::default(),
    )
    .unwrap();
    let solution = solve(&index, &keep, &SolveOptions::default()).unwrap();
    assert_eq!(solution.get("pkg-a").unwrap().version.as_str(), "1.0");

    let update = compile(
        &[Intent::Update("pkg-a>=1.0".into())],
        &installed,
        &[],
        &CompileContext::default(),
    )
    .unwrap();
    let solution = solve(&index, &update, &SolveOptions::default()).unwrap();
    assert_eq!(solution.get("pkg-a").unwrap().version.as_str(), "2.0");
}

#[test]
fn incompatible_dependencies_yield_exact_core() {
    let index = index(vec![
        rec("pkg-x", "1.0", &["libfoo <2.0"]),
        rec("pkg-y", "1.0", &["libfoo >=2.0"]),
        rec("libfoo", "1.5", &[]),
        rec("libfoo", "2.5", &[]),
    ]);
    let request = SolverRequest::new(specs(&["pkg-x", "pkg-y"]));
    let err = solve(&index, &request, &SolveOptions::default()).unwrap_err();
    let core = match err {
        SolveError::Unsatisfiable(core) => core,
        other => panic!("expected a conflict, got {other:?}"),
    };

    let mut members: Vec<String> = core.constraints.iter().map(ToString::to_string).collect();
    members.sort();
    assert_eq!(
        members,
        vec![
            "main::pkg-x-1.0-0 depends on libfoo <2.0",
            "main::pkg-y-1.0-0 depends on libfoo >=2.0",
        ]
    );
    assert!(core.constraints.iter().all(|c| c.kind == ConstraintKind::Depends));
    assert_eq!(core.candidates["libfoo"], vec!["2.5", "1.5"]);
    assert!(core.explanation().contains("libfoo: 2.5, 1.5"));
}

#[test]
fn every_core_member_is_necessary() {
    let index = index(vec![
        rec("app", "1.0", &["web >=2", "db"]),
        rec("web", "2.0", &["tls >=3"]),
        rec("web", "1.0", &["tls"]),
        rec("db", "1.0", &["tls <3"]),
        rec("tls", "2.0", &[]),
        rec("tls", "3.0", &[]),
        rec("cli", "1.0", &[]),
    ]);
    let mut request = SolverRequest::new(specs(&["app", "cli"]));
    request.pins = specs(&["cli 1.*"]);

    let err = solve(&index, &request, &SolveOptions::default()).unwrap_err();
    let core = match err {
        SolveError::Unsatisfiable(core) => core,
        other => panic!("expected a conflict, got {other:?}"),
    };
    assert!(!core.is_empty());

    let everything: Vec<Constraint> = core.background.iter().chain(&core.constraints).cloned().collect();
    assert!(!is_satisfiable(&index, &request, &everything).unwrap());
    for skip in 0..core.constraints.len() {
        let remainder: Vec<Constraint> = core
            .background
            .iter()
            .chain(core.constraints.iter().enumerate().filter(|(i, _)| *i != skip).map(|(_, c)| c))
            .cloned()
            .collect();
        assert!(
            is_satisfiable(&index, &request, &remainder).unwrap(),
            "core stays unsatisfiable without {}",
            core.constraints[skip]
        );
    }
    assert!(!core.constraints.iter().any(|c| c.kind == ConstraintKind::Pin));
}

#[test]
fn explanation_is_deterministic() {
    let index = index(vec![
        rec("pkg-x", "1.0", &["libfoo <2.0"]),
        rec("pkg-y", "1.0", &["libfoo >=2.0"]),
        rec("libfoo", "1.5", &[]),
        rec("libfoo", "2.5", &[]),
    ]);
    let request = SolverRequest::new(specs(&["pkg-x", "pkg-y"]));
    let explain = || match solve(&index, &request, &SolveOptions::default()) {
        Err(SolveError::Unsatisfiable(core)) => core.explanation(),
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(explain(), explain());
}

#[test]
fn non_positive_budget_times_out() {
    let mut records = Vec::new();
    for name in ["a", "b", "c", "d", "e", "f"] {
        for minor in 0..20 {
            records.push(rec(name, &format!("1.{minor}"), &["a", "b", "c", "d", "e", "f"]));
        }
    }
    let index = index(records);
    let request = SolverRequest::new(specs(&["a", "b", "c", "d", "e", "f"]));
    for budget in [0, -1, -60_000] {
        match solve(&index, &request, &SolveOptions::new(budget)) {
            Err(SolveError::Timeout { budget_ms, .. }) => assert_eq!(budget_ms, budget),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}

#[test]
fn positive_budget_runs_out_during_search() {
    // Ten packages over nine shared version slots: each version excludes the
    // same version of every other package, so no assignment exists.
    let names: Vec<String> = (0..10).map(|i| format!("p{i}")).collect();
    let mut records = Vec::new();
    for name in &names {
        for slot in 0..9 {
            let version = format!("1.{slot}");
            let excluded = names
                .iter()
                .filter(|other| *other != name)
                .map(|other| MatchSpec::parse(&format!("{other} !={version}")).unwrap())
                .collect();
            records.push(rec(name, &version, &[]).with_constrains(excluded));
        }
    }
    let index = index(records);
    let request = SolverRequest::new(names.iter().map(|n| MatchSpec::parse(n).unwrap()).collect());

    let started = std::time::Instant::now();
    match solve(&index, &request, &SolveOptions::new(100)) {
        Err(SolveError::Timeout { budget_ms, .. }) => assert_eq!(budget_ms, 100),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[test]
fn lowest_strategy_picks_oldest() {
    let index = scientific_index();
    let options = SolveOptions::default()
        .with_ordering(DefaultOrdering::new(SolveStrategy::Lowest, ChannelPriority::Strict));
    let solution = solve(&index, &SolverRequest::new(specs(&["numpy"])), &options).unwrap();
    assert_eq!(solution.get("numpy").unwrap().version.as_str(), "1.24.0");
    assert_eq!(solution.get("python").unwrap().version.as_str(), "3.10.4");
}

#[test]
fn strict_channel_priority_shadows_newer_versions() {
    let records = vec![
        rec("zlib", "1.2", &[]).with_channel("high", 2),
        rec("zlib", "1.3", &[]).with_channel("low", 1),
    ];
    let strict = RepositoryIndex::new(records.clone(), ChannelPriority::Strict);
    let solution = solve(&strict, &SolverRequest::new(specs(&["zlib"])), &SolveOptions::default()).unwrap();
    assert_eq!(solution.get("zlib").unwrap().channel, "high");

    let flexible = RepositoryIndex::new(records.clone(), ChannelPriority::Flexible);
    let solution = solve(&flexible, &SolverRequest::new(specs(&["zlib >=1.3"])), &SolveOptions::default()).unwrap();
    assert_eq!(solution.get("zlib").unwrap().channel, "low");

    let disabled = RepositoryIndex::new(records, ChannelPriority::Disabled);
    let options = SolveOptions::default()
        .with_ordering(DefaultOrdering::new(SolveStrategy::Highest, ChannelPriority::Disabled));
    let solution = solve(&disabled, &SolverRequest::new(specs(&["zlib"])), &options).unwrap();
    assert_eq!(solution.get("zlib").unwrap().version.as_str(), "1.3");
}

#[test]
fn virtual_packages_satisfy_dependencies() {
    let records = vec![rec("tool", "1.0", &["__glibc >=2.17"])];
    let glibc = PackageRecord::virtual_package("__glibc=2.35").unwrap();
    let index = RepositoryIndex::with_virtual_packages(records, vec![glibc], ChannelPriority::Strict);
    let solution = solve(&index, &SolverRequest::new(specs(&["tool"])), &SolveOptions::default()).unwrap();
    assert!(solution.contains("__glibc"));

    let old = PackageRecord::virtual_package("__glibc=2.12").unwrap();
    let index = RepositoryIndex::with_virtual_packages(
        vec![rec("tool", "1.0", &["__glibc >=2.17"])],
        vec![old],
        ChannelPriority::Strict,
    );
    assert!(matches!(
        solve(&index, &SolverRequest::new(specs(&["tool"])), &SolveOptions::default()),
        Err(SolveError::Unsatisfiable(_))
    ));
}

#[test]
fn removal_drops_package_and_dependents() {
    let index = index(vec![
        rec("lib", "1.0", &[]),
        rec("app", "1.0", &["lib"]),
        rec("other", "1.0", &[]),
    ]);
    let installed = vec![rec("lib", "1.0", &[]), rec("app", "1.0", &["lib"]), rec("other", "1.0", &[])];
    let request = compile(
        &[Intent::Remove("lib".into())],
        &installed,
        &[],
        &CompileContext::default(),
    )
    .unwrap();
    let solution = solve(&index, &request, &SolveOptions::default()).unwrap();
    assert_eq!(solution.names().collect::<Vec<_>>(), vec!["other"]);
}

#[test]
fn no_deps_leaves_dependencies_alone() {
    let index = index(vec![
        rec("app", "2.0", &["lib >=1"]),
        rec("lib", "1.0", &[]),
        rec("lib", "1.5", &[]),
    ]);
    let installed = vec![rec("lib", "1.0", &[])];
    let ctx = CompileContext {
        flags: RequestFlags {
            no_deps: true,
            ..RequestFlags::default()
        },
        ..CompileContext::default()
    };
    let request = compile(&[Intent::Update("app".into())], &installed, &[], &ctx).unwrap();
    let solution = solve(&index, &request, &SolveOptions::default()).unwrap();
    assert_eq!(solution.get("app").unwrap().version.as_str(), "2.0");
    assert_eq!(solution.get("lib").unwrap().version.as_str(), "1.0");
}

#[test]
fn missing_packages_are_not_conflicts() {
    let index = scientific_index();
    let err = solve(&index, &SolverRequest::new(specs(&["tensorflow"])), &SolveOptions::default()).unwrap_err();
    assert!(matches!(err, SolveError::PackagesNotFound(ref names) if names == &vec!["tensorflow".to_string()]));
}
