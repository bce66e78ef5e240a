use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use fw_prebuild::minify::{AssetKind, MinifyOptions, run_pipeline, stamp};

fn seed(src: &Path) {
    fs::create_dir_all(src.join("js")).expect("mkdir js");
    fs::write(
        src.join("index.html"),
        "<!DOCTYPE html>\n<html>\n  <head>\n    <title>Status</title>\n  </head>\n  <body>\n    <p>  Ready  </p>\n  </body>\n</html>\n",
    )
    .expect("write html");
    fs::write(
        src.join("style.css"),
        "/* layout */\nbody {\n  margin: 0px;\n  color: #ff0000;\n}\n",
    )
    .expect("write css");
    fs::write(
        src.join("js/app.js"),
        "// status poller\nfunction poll(url) {\n  return fetch(url);\n}\n",
    )
    .expect("write js");
    fs::write(src.join("notes.txt"), "not shipped\n").expect("write txt");
}

fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.expect("walk");
        if entry.file_type().is_file() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("strip")
                .to_string_lossy()
                .replace('\\', "/");
            out.insert(rel, fs::read(entry.path()).expect("read output"));
        }
    }
    out
}

#[test]
fn only_recognized_assets_reach_the_output_tree() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("data");
    let out = tmp.path().join("build/data");
    seed(&src);

    let report = run_pipeline(&src, &out, &MinifyOptions::default()).expect("pipeline");
    assert_eq!(report.total_files(), 3);
    assert_eq!(report.files.get(&AssetKind::Js).copied(), Some(1));

    let files = snapshot(&out);
    let names: Vec<&str> = files.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["index.html", "js/app.js", "style.css"]);

    let css = String::from_utf8(files["style.css"].clone()).expect("utf8");
    assert!(!css.contains("layout"));
    assert!(!css.contains('\n'));
    let js = String::from_utf8(files["js/app.js"].clone()).expect("utf8");
    assert!(!js.contains("status poller"));
}

#[test]
fn doctype_survives_and_markup_collapses() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("data");
    let out = tmp.path().join("out");
    fs::create_dir_all(&src).expect("mkdir data");
    fs::write(
        src.join("index.html"),
        "<!DOCTYPE html><div   class=\"a\">Hi</div>",
    )
    .expect("write html");

    run_pipeline(&src, &out, &MinifyOptions::default()).expect("pipeline");
    let html = fs::read_to_string(out.join("index.html")).expect("read html");
    assert_eq!(html, "<!DOCTYPE html><div class=a>Hi</div>");
}

#[test]
fn rerun_is_stable_and_drops_stray_files() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("data");
    let out = tmp.path().join("build/data");
    seed(&src);

    run_pipeline(&src, &out, &MinifyOptions::default()).expect("first run");
    let first = snapshot(&out);

    fs::write(out.join("stale.html"), "<p>old</p>").expect("write stray");
    run_pipeline(&src, &out, &MinifyOptions::default()).expect("second run");

    assert!(!out.join("stale.html").exists());
    assert_eq!(snapshot(&out), first);
}

#[test]
fn incremental_runs_skip_until_something_drifts() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("data");
    let out = tmp.path().join("build/data");
    seed(&src);
    let opts = MinifyOptions {
        incremental: true,
        ..MinifyOptions::default()
    };

    let first = run_pipeline(&src, &out, &opts).expect("first run");
    assert!(!first.skipped);
    assert!(stamp::stamp_path(&out).is_file());
    let tree = snapshot(&out);

    let second = run_pipeline(&src, &out, &opts).expect("second run");
    assert!(second.skipped);
    assert_eq!(snapshot(&out), tree);

    // A stray file in the output makes the stamp stale.
    fs::write(out.join("stale.css"), "a{}").expect("write stray");
    let third = run_pipeline(&src, &out, &opts).expect("third run");
    assert!(!third.skipped);
    assert_eq!(snapshot(&out), tree);

    fs::write(src.join("extra.js"), "var x = 1;\n").expect("write new source");
    let fourth = run_pipeline(&src, &out, &opts).expect("fourth run");
    assert!(!fourth.skipped);
    assert!(out.join("extra.js").is_file());
}

#[test]
fn full_rebuild_clears_a_previous_stamp() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("data");
    let out = tmp.path().join("build/data");
    seed(&src);
    let incremental = MinifyOptions {
        incremental: true,
        ..MinifyOptions::default()
    };

    run_pipeline(&src, &out, &incremental).expect("incremental run");
    assert!(stamp::stamp_path(&out).is_file());
    run_pipeline(&src, &out, &MinifyOptions::default()).expect("full run");
    assert!(!stamp::stamp_path(&out).exists());
}

#[test]
fn output_tree_inside_sources_is_not_minified_again() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let src = tmp.path().join("data");
    let out = src.join("min");
    seed(&src);

    run_pipeline(&src, &out, &MinifyOptions::default()).expect("first run");
    let report = run_pipeline(&src, &out, &MinifyOptions::default()).expect("second run");
    assert_eq!(report.total_files(), 3);
    assert!(!out.join("min").exists());
}

#[test]
fn source_inside_output_tree_is_refused() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = tmp.path().join("build");
    let src = out.join("data");
    seed(&src);

    let err = run_pipeline(&src, &out, &MinifyOptions::default()).expect_err("overlap");
    assert!(err.to_string().contains("refusing"), "{err}");
    assert!(src.join("index.html").is_file());
}

#[test]
fn missing_source_tree_yields_an_empty_output() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = tmp.path().join("build/data");
    fs::create_dir_all(&out).expect("mkdir out");
    fs::write(out.join("old.js"), "x").expect("write old");

    let report =
        run_pipeline(&tmp.path().join("nope"), &out, &MinifyOptions::default()).expect("run");
    assert_eq!(report.total_files(), 0);
    assert!(out.is_dir());
    assert!(snapshot(&out).is_empty());
}

#[test]
fn nested_output_does_not_grow_when_roots_are_spelled_differently() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("alias")).expect("mkdir alias");
    let src = tmp.path().join("alias").join("..").join("data");
    let out = tmp.path().join("data").join("min");
    fs::create_dir_all(tmp.path().join("data")).expect("mkdir data");
    fs::write(tmp.path().join("data/a.js"), "// a\nvar a = 1;\n").expect("write js");

    let first = run_pipeline(&src, &out, &MinifyOptions::default()).expect("first run");
    let second = run_pipeline(&src, &out, &MinifyOptions::default()).expect("second run");

    assert_eq!(first.total_files(), 1);
    assert_eq!(second.total_files(), 1);
    assert!(!out.join("min").exists());
    let names: Vec<String> = snapshot(&out).into_keys().collect();
    assert_eq!(names, vec!["a.js".to_string()]);
}
