use fg_core::{CallEdgeRecord, CallType, Error, FunctionRecord, FuzzerFile, FuzzerInfo, ReachesRecord};
use fg_graph::{GraphStore, NodeKind};
use uuid::Uuid;

fn lib_function(name: &str, file: &str) -> FunctionRecord {
    let mut rec = FunctionRecord::named(name, file);
    rec.language = Some("c".to_string());
    rec.content = Some(format!("int {name}(void) {{ return 0; }}"));
    rec
}

fn direct(caller: (&str, &str), callee: (&str, &str)) -> CallEdgeRecord {
    CallEdgeRecord {
        caller_name: caller.0.to_string(),
        caller_file_path: Some(caller.1.to_string()),
        callee_name: callee.0.to_string(),
        callee_file_path: Some(callee.1.to_string()),
        call_type: CallType::Direct,
        confidence: 1.0,
        backend: "svf".to_string(),
    }
}

fn fuzzer(name: &str, file: &str, library_calls: &[&str]) -> FuzzerInfo {
    FuzzerInfo {
        name: name.to_string(),
        entry_function: fg_core::FUZZ_ENTRY_SYMBOL.to_string(),
        files: vec![FuzzerFile {
            path: file.to_string(),
            source: format!("// harness {name}"),
        }],
        focus: None,
        library_calls: library_calls.iter().map(|s| s.to_string()).collect(),
    }
}

/// Library fixture:
///
/// ```text
/// parse_header ─→ parse_body ─→ helper
///       │  └────────────────────→ helper (also direct)
///       └──→ memcpy (external)
/// dispatch ──fptr──→ cb
/// ```
async fn seed(store: &GraphStore) -> Uuid {
    let id = Uuid::new_v4();
    store
        .create_snapshot_node(id, "https://example/libdemo", "v1.0", "svf")
        .await
        .unwrap();

    let functions = vec![
        lib_function("parse_header", "src/parse.c"),
        lib_function("parse_body", "src/parse.c"),
        lib_function("helper", "src/util.c"),
        lib_function("dispatch", "src/table.c"),
        lib_function("cb", "src/table.c"),
        lib_function("init", "src/a.c"),
        lib_function("init", "src/b.c"),
    ];
    assert_eq!(store.import_functions(id, &functions).await.unwrap(), 7);

    let mut edges = vec![
        direct(("parse_header", "src/parse.c"), ("parse_body", "src/parse.c")),
        direct(("parse_body", "src/parse.c"), ("helper", "src/util.c")),
        direct(("parse_header", "src/parse.c"), ("helper", "src/util.c")),
        // Unknown callee: must materialize as External, not drop.
        CallEdgeRecord {
            caller_name: "parse_header".to_string(),
            caller_file_path: Some("src/parse.c".to_string()),
            callee_name: "memcpy".to_string(),
            callee_file_path: None,
            call_type: CallType::Direct,
            confidence: 1.0,
            backend: "svf".to_string(),
        },
    ];
    edges.push(CallEdgeRecord {
        caller_name: "dispatch".to_string(),
        caller_file_path: Some("src/table.c".to_string()),
        callee_name: "cb".to_string(),
        callee_file_path: Some("src/table.c".to_string()),
        call_type: CallType::Fptr,
        confidence: 0.9,
        backend: "svf".to_string(),
    });
    assert_eq!(store.import_edges(id, &edges).await.unwrap(), 5);

    let fuzzers = vec![
        fuzzer("fz_a", "fuzz/a.c", &["parse_header"]),
        fuzzer("fz_b", "fuzz/b.c", &["dispatch"]),
    ];
    assert_eq!(store.import_fuzzers(id, &fuzzers).await.unwrap(), 2);
    id
}

#[tokio::test]
async fn same_named_entry_functions_coexist() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    // Two distinct Function nodes share the entry symbol, differing in
    // file_path; a bare-name lookup is ambiguous.
    let err = store
        .get_function_metadata(id, fg_core::FUZZ_ENTRY_SYMBOL, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AmbiguousFunction(_)));

    let a = store
        .get_function_metadata(id, fg_core::FUZZ_ENTRY_SYMBOL, Some("fuzz/a.c"))
        .await
        .unwrap()
        .unwrap();
    let b = store
        .get_function_metadata(id, fg_core::FUZZ_ENTRY_SYMBOL, Some("fuzz/b.c"))
        .await
        .unwrap()
        .unwrap();
    assert_ne!(a.id, b.id);
    assert!(a.is_entry_point && b.is_entry_point);

    // Each fuzzer bridges only into its own corner of the library.
    let callees_a = store
        .get_callees(id, fg_core::FUZZ_ENTRY_SYMBOL, Some("fuzz/a.c"))
        .await
        .unwrap();
    assert_eq!(callees_a.len(), 1);
    assert_eq!(callees_a[0].function.name, "parse_header");
    assert_eq!(callees_a[0].backend, "harness");
}

#[tokio::test]
async fn function_pointer_edge_survives() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let callees = store
        .get_callees(id, "dispatch", Some("src/table.c"))
        .await
        .unwrap();
    assert_eq!(callees.len(), 1);
    assert_eq!(callees[0].function.name, "cb");
    assert_eq!(callees[0].call_type, CallType::Fptr);
    assert!((callees[0].confidence - 0.9).abs() < 1e-9);

    let callers = store.get_callers(id, "cb", Some("src/table.c")).await.unwrap();
    assert_eq!(callers.len(), 1);
    assert_eq!(callers[0].function.name, "dispatch");
}

#[tokio::test]
async fn unknown_callee_becomes_external() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let externals = store.list_external_function_names(id).await.unwrap();
    assert_eq!(externals, vec!["memcpy".to_string()]);

    let memcpy = store
        .get_function_metadata(id, "memcpy", Some(""))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(memcpy.kind, NodeKind::External);
}

#[tokio::test]
async fn imports_are_idempotent() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let nodes_before = store.count_nodes(id).await.unwrap();
    let edges_before = store.count_edges(id).await.unwrap();

    // Re-running every import creates nothing new.
    let functions = vec![lib_function("parse_header", "src/parse.c")];
    assert_eq!(store.import_functions(id, &functions).await.unwrap(), 0);
    let edges = vec![direct(
        ("parse_header", "src/parse.c"),
        ("parse_body", "src/parse.c"),
    )];
    assert_eq!(store.import_edges(id, &edges).await.unwrap(), 0);
    let fuzzers = vec![fuzzer("fz_a", "fuzz/a.c", &["parse_header"])];
    assert_eq!(store.import_fuzzers(id, &fuzzers).await.unwrap(), 0);

    assert_eq!(store.count_nodes(id).await.unwrap(), nodes_before);
    assert_eq!(store.count_edges(id).await.unwrap(), edges_before);
}

#[tokio::test]
async fn shortest_path_returns_all_minimal_paths() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let paths = store
        .shortest_path(id, "parse_header", None, "helper", None, -1, -1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].len(), 2);
    assert_eq!(paths[0][0].name, "parse_header");
    assert_eq!(paths[0][1].name, "helper");

    // Unreachable pair: None, not an error.
    let none = store
        .shortest_path(id, "dispatch", None, "helper", None, -1, -1)
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn all_paths_ordered_by_length() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let paths = store
        .get_all_paths(id, "parse_header", None, "helper", None, -1, -1)
        .await
        .unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0].len(), 2, "direct hop first");
    assert_eq!(paths[1].len(), 3, "via parse_body second");

    let capped = store
        .get_all_paths(id, "parse_header", None, "helper", None, -1, 1)
        .await
        .unwrap();
    assert_eq!(capped.len(), 1);
    assert_eq!(capped[0].len(), 2);

    let depth_limited = store
        .get_all_paths(id, "parse_header", None, "helper", None, 1, -1)
        .await
        .unwrap();
    assert_eq!(depth_limited.len(), 1);
}

#[tokio::test]
async fn reaches_import_and_queries() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let reaches = vec![
        ReachesRecord {
            fuzzer_name: "fz_a".to_string(),
            function_name: "parse_header".to_string(),
            function_file_path: Some("src/parse.c".to_string()),
            depth: 1,
        },
        ReachesRecord {
            fuzzer_name: "fz_a".to_string(),
            function_name: "parse_body".to_string(),
            function_file_path: Some("src/parse.c".to_string()),
            depth: 2,
        },
        ReachesRecord {
            fuzzer_name: "fz_a".to_string(),
            function_name: "helper".to_string(),
            function_file_path: Some("src/util.c".to_string()),
            depth: 2,
        },
        ReachesRecord {
            fuzzer_name: "fz_b".to_string(),
            function_name: "dispatch".to_string(),
            function_file_path: Some("src/table.c".to_string()),
            depth: 1,
        },
        ReachesRecord {
            fuzzer_name: "fz_b".to_string(),
            function_name: "cb".to_string(),
            function_file_path: Some("src/table.c".to_string()),
            depth: 2,
        },
    ];
    assert_eq!(store.import_reaches(id, &reaches).await.unwrap(), 5);

    let depth_one = store
        .reachable_functions_by_one_fuzzer(id, "fz_a", Some(1), None)
        .await
        .unwrap();
    assert_eq!(depth_one.len(), 1);
    assert_eq!(depth_one[0].function.name, "parse_header");

    let shallow = store
        .reachable_functions_by_one_fuzzer(id, "fz_a", None, Some(2))
        .await
        .unwrap();
    assert_eq!(shallow.len(), 3);

    // The two `init` copies are covered by no fuzzer.
    let unreached = store.unreached_functions_by_all_fuzzers(id).await.unwrap();
    let names: Vec<&str> = unreached.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["init", "init"]);

    let stats = store.get_snapshot_statistics(id).await.unwrap();
    assert_eq!(stats.fuzzer_count, 2);
    assert_eq!(stats.external_count, 1);
    assert_eq!(stats.reaches_count, 5);
    assert_eq!(stats.depth_distribution.get(&1), Some(&2));
    assert_eq!(stats.depth_distribution.get(&2), Some(&3));
}

#[tokio::test]
async fn depth_zero_reaches_are_rejected() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let reaches = vec![ReachesRecord {
        fuzzer_name: "fz_a".to_string(),
        function_name: "parse_header".to_string(),
        function_file_path: Some("src/parse.c".to_string()),
        depth: 0,
    }];
    assert_eq!(store.import_reaches(id, &reaches).await.unwrap(), 0);
}

#[tokio::test]
async fn fuzzer_metadata_round_trip() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let info = store.get_fuzzer_metadata(id, "fz_a").await.unwrap().unwrap();
    assert_eq!(info.entry_function, fg_core::FUZZ_ENTRY_SYMBOL);
    assert_eq!(info.files.len(), 1);
    assert!(info.files[0].source.contains("harness"));
    assert_eq!(info.library_calls, vec!["parse_header".to_string()]);

    let listed = store.list_fuzzer_info_no_code(id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|f| f.files.iter().all(|file| file.source.is_empty())));

    assert!(store.get_fuzzer_metadata(id, "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn search_and_by_file() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let matches = store.search_functions(id, "parse_*").await.unwrap();
    let names: Vec<&str> = matches.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["parse_body", "parse_header"]);

    let in_file = store
        .list_function_info_by_file(id, "src/parse.c")
        .await
        .unwrap();
    assert_eq!(in_file.len(), 2);
}

#[tokio::test]
async fn delete_snapshot_removes_subtree() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;
    let other = seed(&store).await;

    store.delete_snapshot(id).await.unwrap();
    assert_eq!(store.count_nodes(id).await.unwrap(), 0);
    assert_eq!(store.count_edges(id).await.unwrap(), 0);

    // A different snapshot is untouched.
    assert!(store.count_nodes(other).await.unwrap() > 0);

    // Idempotent.
    store.delete_snapshot(id).await.unwrap();
}

#[tokio::test]
async fn raw_query_escape_hatch() {
    let store = GraphStore::connect("sqlite::memory:").await.unwrap();
    let id = seed(&store).await;

    let rows = store
        .raw_query(
            "SELECT name, COUNT(*) AS copies FROM functions \
             WHERE snapshot_id = $1 GROUP BY name HAVING copies > 1",
            &[serde_json::json!(id.to_string())],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2, "init and the entry symbol have two copies");
}
