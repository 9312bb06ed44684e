//! End-to-end behaviour of the tree cache against a disk-backed store.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tarn_core::{
    DiskStore, Entry, Error, ExportOptions, ImportFilter, MemoryStore, ObjectStore, TreeStore,
};
use tempfile::TempDir;

type Contents = BTreeMap<String, Vec<u8>>;

fn contents(files: &[(&str, &str)]) -> Contents {
    files
        .iter()
        .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
        .collect()
}

fn create_dir(files: &Contents) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), files);
    dir
}

fn write_files(root: &Path, files: &Contents) {
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

/// Every file under `root`, keyed by `/`-separated relative path.
fn read_dir(root: &Path) -> Contents {
    fn walk(root: &Path, dir: &Path, out: &mut Contents) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel: Vec<String> = path
                    .strip_prefix(root)
                    .unwrap()
                    .iter()
                    .map(|s| s.to_str().unwrap().to_string())
                    .collect();
                out.insert(rel.join("/"), fs::read(&path).unwrap());
            }
        }
    }
    let mut out = Contents::new();
    walk(root, root, &mut out);
    out
}

#[track_caller]
fn assert_contents(dir: &Path, expected: &Contents) {
    assert_eq!(&read_dir(dir), expected);
}

struct Fixture {
    _store_dir: TempDir,
    cache: TreeStore<DiskStore>,
    content: Contents,
    content_dir: TempDir,
    content_tree: tarn_core::Hash,
}

impl Fixture {
    async fn new() -> Self {
        let store_dir = TempDir::new().unwrap();
        let cache = TreeStore::new(DiskStore::init(store_dir.path()).unwrap());
        let content = contents(&[("a", "foo"), ("b/c", "bar"), ("b/d", "baz")]);
        let content_dir = create_dir(&content);
        let content_tree = cache
            .import_tree(content_dir.path(), &ImportFilter::new())
            .await
            .unwrap();
        Self {
            _store_dir: store_dir,
            cache,
            content,
            content_dir,
            content_tree,
        }
    }

    async fn export(
        &self,
        tree: &tarn_core::Hash,
        dest: &Path,
        options: ExportOptions,
    ) -> tarn_core::Result<()> {
        self.cache.export_tree(tree, dest, &options).await.map(|_| ())
    }

    fn since_content(&self) -> ExportOptions {
        ExportOptions::new().previous_tree(self.content_tree)
    }
}

#[tokio::test]
async fn test_basic_export() {
    let f = Fixture::new().await;
    let export_dir = TempDir::new().unwrap();
    f.export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &f.content);
}

#[tokio::test]
async fn test_export_force_with_preexisting_files() {
    let f = Fixture::new().await;
    let dirty = contents(&[("a", "junk")]);
    let export_dir = create_dir(&dirty);

    let err = f
        .export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_dirty_working_copy());
    assert_contents(export_dir.path(), &dirty);

    f.export(&f.content_tree, export_dir.path(), ExportOptions::new().force(true))
        .await
        .unwrap();
    assert_contents(export_dir.path(), &f.content);
}

#[tokio::test]
async fn test_export_force_with_changed_files() {
    let f = Fixture::new().await;
    let export_dir = TempDir::new().unwrap();
    f.export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();

    fs::write(export_dir.path().join("a"), "dirty").unwrap();
    let err = f
        .export(&f.content_tree, export_dir.path(), f.since_content())
        .await
        .unwrap_err();
    assert!(err.is_dirty_working_copy());
    assert_eq!(fs::read(export_dir.path().join("a")).unwrap(), b"dirty");

    f.export(&f.content_tree, export_dir.path(), f.since_content().force(true))
        .await
        .unwrap();
    assert_contents(export_dir.path(), &f.content);
}

#[tokio::test]
async fn test_reexport_is_idempotent() {
    let f = Fixture::new().await;
    let export_dir = TempDir::new().unwrap();
    f.export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    for _ in 0..2 {
        let stats = f
            .cache
            .export_tree(&f.content_tree, export_dir.path(), &f.since_content())
            .await
            .unwrap();
        assert_eq!(stats.files_written, 0);
        assert_eq!(stats.files_removed, 0);
        assert_contents(export_dir.path(), &f.content);
    }
}

#[tokio::test]
async fn test_multiple_imports() {
    let f = Fixture::new().await;
    let new_content = contents(&[("fee/fi", "fo fum")]);
    let new_tree = f
        .cache
        .import_tree(create_dir(&new_content).path(), &ImportFilter::new())
        .await
        .unwrap();
    let export_dir = TempDir::new().unwrap();
    f.export(&new_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &new_content);
}

#[tokio::test]
async fn test_import_with_gitignore() {
    let f = Fixture::new().await;
    let new_content = contents(&[("fee/fi", "fo fum"), (".gitignore", "fee/")]);
    let new_tree = f
        .cache
        .import_tree(create_dir(&new_content).path(), &ImportFilter::new())
        .await
        .unwrap();
    let export_dir = TempDir::new().unwrap();
    f.export(&new_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &new_content);
}

#[tokio::test]
async fn test_import_with_picks() {
    let f = Fixture::new().await;
    let all = contents(&[("foo", ""), ("bar", ""), ("baz/bing", "")]);
    let test_dir = create_dir(&all);
    let tree = f
        .cache
        .import_tree(test_dir.path(), &ImportFilter::new().pick("foo").pick("baz"))
        .await
        .unwrap();
    let out_dir = TempDir::new().unwrap();
    f.export(&tree, out_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(out_dir.path(), &contents(&[("foo", ""), ("baz/bing", "")]));
}

#[tokio::test]
async fn test_export_with_existing_files() {
    let f = Fixture::new().await;
    let more = contents(&[("untracked", "stuff")]);
    let export_dir = create_dir(&more);
    f.export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    let mut expected = f.content.clone();
    expected.extend(more.clone());
    assert_contents(export_dir.path(), &expected);

    // Without a previous tree, the files written last time now collide.
    let err = f
        .export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_dirty_working_copy());

    // Ignore files in the working copy change nothing.
    fs::write(export_dir.path().join(".gitignore"), "*\n").unwrap();
    let err = f
        .export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_dirty_working_copy());
}

#[tokio::test]
async fn test_previous_tree() {
    let f = Fixture::new().await;
    let export_dir = create_dir(&f.content);

    let mut new_content = f.content.clone();
    new_content.insert("a".to_string(), b"foo different".to_vec());
    new_content.insert("newfile".to_string(), b"newfile stuff".to_vec());
    let new_tree = f
        .cache
        .import_tree(create_dir(&new_content).path(), &ImportFilter::new())
        .await
        .unwrap();

    f.export(&new_tree, export_dir.path(), f.since_content())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &new_content);

    // A dirty working copy blocks the same transition.
    let mut dirty_content = f.content.clone();
    dirty_content.insert("a".to_string(), b"foo dirty".to_vec());
    let dirty_dir = create_dir(&dirty_content);
    let err = f
        .export(&new_tree, dirty_dir.path(), f.since_content())
        .await
        .unwrap_err();
    assert!(err.is_dirty_working_copy());
    assert_contents(dirty_dir.path(), &dirty_content);

    // A missing file is fine.
    fs::remove_file(dirty_dir.path().join("a")).unwrap();
    f.export(&new_tree, dirty_dir.path(), f.since_content())
        .await
        .unwrap();
    assert_contents(dirty_dir.path(), &new_content);

    // Dirty even when the new tree leaves that file alone.
    let mut unrelated_dirty = f.content.clone();
    unrelated_dirty.insert("b/c".to_string(), b"bar dirty".to_vec());
    let unrelated_dir = create_dir(&unrelated_dirty);
    let err = f
        .export(&new_tree, unrelated_dir.path(), f.since_content())
        .await
        .unwrap_err();
    match err {
        Error::DirtyWorkingCopy { paths, .. } => assert_eq!(paths, vec!["b/c"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_files_in_previous_tree() {
    let f = Fixture::new().await;
    let export_dir = TempDir::new().unwrap();
    f.export(&f.content_tree, export_dir.path(), f.since_content())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &f.content);

    fs::remove_file(export_dir.path().join("a")).unwrap();
    f.export(&f.content_tree, export_dir.path(), f.since_content())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &f.content);
}

#[tokio::test]
async fn test_merge_trees() {
    let f = Fixture::new().await;
    let merged = f
        .cache
        .merge_trees(Some(&f.content_tree), &f.content_tree, "subdir")
        .await
        .unwrap();
    let mut expected = f.content.clone();
    for (path, content) in &f.content {
        expected.insert(format!("subdir/{}", path), content.clone());
    }
    let export_dir = TempDir::new().unwrap();
    f.export(&merged, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &expected);

    let err = f
        .cache
        .merge_trees(Some(&merged), &f.content_tree, "subdir")
        .await
        .unwrap_err();
    assert!(err.is_merge_conflict());
}

#[tokio::test]
async fn test_merge_with_deep_prefix() {
    let f = Fixture::new().await;
    let content = contents(&[("file", "stuff")]);
    let tree = f
        .cache
        .import_tree(create_dir(&content).path(), &ImportFilter::new())
        .await
        .unwrap();
    let prefixed = f.cache.merge_trees(None, &tree, "a/b/").await.unwrap();
    let export_dir = TempDir::new().unwrap();
    f.export(&prefixed, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(export_dir.path(), &contents(&[("a/b/file", "stuff")]));
}

#[tokio::test]
async fn test_read_file() {
    let f = Fixture::new().await;
    assert_eq!(f.cache.read_file(&f.content_tree, "a").await.unwrap(), b"foo");
    assert_eq!(f.cache.read_file(&f.content_tree, "b/c").await.unwrap(), b"bar");
    assert!(matches!(
        f.cache.read_file(&f.content_tree, "nonexistent").await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        f.cache.read_file(&f.content_tree, "b").await,
        Err(Error::IsADirectory { .. })
    ));
}

async fn excludes_and_picks(excludes: &[&str], picks: &[&str], expected: &[(&str, &str)]) {
    let f = Fixture::new().await;
    let mut filter = ImportFilter::new();
    for exclude in excludes {
        filter = filter.exclude(*exclude);
    }
    for pick in picks {
        filter = filter.pick(*pick);
    }
    let tree = f
        .cache
        .import_tree(f.content_dir.path(), &filter)
        .await
        .unwrap();
    let out_dir = TempDir::new().unwrap();
    f.export(&tree, out_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    assert_contents(out_dir.path(), &contents(expected));
}

#[tokio::test]
async fn test_import_with_specific_file() {
    excludes_and_picks(&[], &["a"], &[("a", "foo")]).await;
}

#[tokio::test]
async fn test_import_with_specific_dir() {
    excludes_and_picks(&[], &["b"], &[("b/c", "bar"), ("b/d", "baz")]).await;
}

#[tokio::test]
async fn test_import_with_excluded_file() {
    excludes_and_picks(&["a"], &[], &[("b/c", "bar"), ("b/d", "baz")]).await;
}

#[tokio::test]
async fn test_import_with_excluded_dir() {
    excludes_and_picks(&["b"], &[], &[("a", "foo")]).await;
}

#[tokio::test]
async fn test_import_with_excludes_and_picks() {
    excludes_and_picks(&["b/c"], &["b"], &[("b/d", "baz")]).await;
}

#[tokio::test]
async fn test_ls_tree() {
    let f = Fixture::new().await;
    let entries = f.cache.ls_tree(&f.content_tree, None, true).await.unwrap();
    assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["a", "b", "b/c", "b/d"]);
    assert!(entries["a"].is_blob() && entries["b/c"].is_blob() && entries["b/d"].is_blob());
    assert!(entries["b"].is_tree());

    let pick = |keys: &[&str]| -> BTreeMap<String, Entry> {
        keys.iter().map(|k| (k.to_string(), entries[*k])).collect()
    };

    assert_eq!(
        f.cache.ls_tree(&f.content_tree, None, false).await.unwrap(),
        pick(&["a", "b"])
    );
    assert_eq!(
        f.cache.ls_tree(&f.content_tree, Some("b/c//./"), false).await.unwrap(),
        pick(&["b/c"])
    );
    assert_eq!(
        f.cache.ls_tree(&f.content_tree, Some("b/"), false).await.unwrap(),
        pick(&["b/c", "b/d"])
    );
    assert_eq!(
        f.cache.ls_tree(&f.content_tree, Some("b"), true).await.unwrap(),
        pick(&["b", "b/c", "b/d"])
    );
    assert_eq!(
        f.cache.ls_tree(&f.content_tree, Some("b/c"), true).await.unwrap(),
        pick(&["b/c"])
    );
}

#[tokio::test]
async fn test_modify_tree() {
    let f = Fixture::new().await;
    let base_tree = f
        .cache
        .import_tree(
            create_dir(&contents(&[("a", "foo"), ("b/c", "bar")])).path(),
            &ImportFilter::new(),
        )
        .await
        .unwrap();
    let entries = f.cache.ls_tree(&base_tree, None, true).await.unwrap();
    let (file_a, dir_b) = (entries["a"], entries["b"]);

    let cases: Vec<(Vec<(&str, Option<Entry>)>, Vec<(&str, &str)>)> = vec![
        (vec![("a", None)], vec![("b/c", "bar")]),
        (vec![("a//./", None)], vec![("b/c", "bar")]),
        (vec![("b", None)], vec![("a", "foo")]),
        (vec![("b/c", None)], vec![("a", "foo")]),
        (vec![("x/y/z", None)], vec![("a", "foo"), ("b/c", "bar")]),
        (vec![("b/x", None)], vec![("a", "foo"), ("b/c", "bar")]),
        (vec![("a/x", None)], vec![("a", "foo"), ("b/c", "bar")]),
        (vec![("b", Some(file_a))], vec![("a", "foo"), ("b", "foo")]),
        (vec![("x", Some(file_a))], vec![("a", "foo"), ("x", "foo"), ("b/c", "bar")]),
        (vec![("x", Some(dir_b))], vec![("a", "foo"), ("b/c", "bar"), ("x/c", "bar")]),
        (vec![("d/e/f", Some(file_a))], vec![("a", "foo"), ("b/c", "bar"), ("d/e/f", "foo")]),
        (vec![("d/e/f", Some(dir_b))], vec![("a", "foo"), ("b/c", "bar"), ("d/e/f/c", "bar")]),
    ];

    for (modifications, expected) in cases {
        let description = format!("{:?}", modifications);
        let modified = f.cache.modify_tree(&base_tree, modifications).await.unwrap();
        let modified_dir = TempDir::new().unwrap();
        f.export(&modified, modified_dir.path(), ExportOptions::new())
            .await
            .unwrap();
        assert_eq!(
            read_dir(modified_dir.path()),
            contents(&expected),
            "modifications {}",
            description
        );
    }
}

#[tokio::test]
async fn test_windows_newlines_are_not_dirty() {
    let f = Fixture::new().await;
    let windows = Contents::from([("file".to_string(), b"windows newline\r\n".to_vec())]);
    let attributes = Contents::from([(".gitattributes".to_string(), b"* text".to_vec())]);
    let tree = f
        .cache
        .import_tree(create_dir(&windows).path(), &ImportFilter::new())
        .await
        .unwrap();
    let out_dir = create_dir(&attributes);
    f.export(&tree, out_dir.path(), ExportOptions::new())
        .await
        .unwrap();
    f.export(&tree, out_dir.path(), ExportOptions::new().previous_tree(tree))
        .await
        .unwrap();

    let mut both = windows.clone();
    both.extend(attributes);
    assert_contents(out_dir.path(), &both);
}

#[tokio::test]
async fn test_touched_file() {
    let f = Fixture::new().await;
    let export_dir = TempDir::new().unwrap();
    let a_path = export_dir.path().join("a");
    let mut t = SystemTime::now();
    let mut bump_mtime_one_minute = || {
        t += Duration::from_secs(60);
        let file = fs::File::options().write(true).open(&a_path).unwrap();
        file.set_modified(t).unwrap();
    };

    f.export(&f.content_tree, export_dir.path(), ExportOptions::new())
        .await
        .unwrap();

    // Touched, no index.
    bump_mtime_one_minute();
    f.export(&f.content_tree, export_dir.path(), f.since_content())
        .await
        .unwrap();

    // Create an index, then touch again and export with it, twice over.
    let index_dir = TempDir::new().unwrap();
    let index_file = index_dir.path().join("test_index_file");
    let with_index = f.since_content().previous_index_file(&index_file);
    f.export(&f.content_tree, export_dir.path(), with_index.clone())
        .await
        .unwrap();
    for _ in 0..2 {
        bump_mtime_one_minute();
        f.export(&f.content_tree, export_dir.path(), with_index.clone())
            .await
            .unwrap();
    }

    // The index never hides a real edit.
    fs::write(&a_path, "edited").unwrap();
    let err = f
        .export(&f.content_tree, export_dir.path(), with_index)
        .await
        .unwrap_err();
    assert!(err.is_dirty_working_copy());
}

#[tokio::test]
async fn test_index_survives_unrelated_working_copy() {
    let f = Fixture::new().await;
    let index_dir = TempDir::new().unwrap();
    let index_file = index_dir.path().join("index");
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let options = f.since_content().previous_index_file(&index_file);
    f.export(&f.content_tree, first.path(), options.clone())
        .await
        .unwrap();
    // An index recorded for another directory is not trusted here.
    f.export(&f.content_tree, second.path(), options)
        .await
        .unwrap();
    assert_contents(second.path(), &f.content);
}

#[tokio::test]
async fn test_memory_and_disk_agree() {
    let f = Fixture::new().await;
    let memory = TreeStore::new(MemoryStore::new());
    let tree = memory
        .import_tree(f.content_dir.path(), &ImportFilter::new())
        .await
        .unwrap();
    assert_eq!(tree, f.content_tree);
    assert!(memory.object_store().contains(&tree));
}

fn arb_contents() -> impl Strategy<Value = Contents> {
    // File names never collide with directory names.
    let path = (
        prop::collection::vec("d[0-2]", 0..3),
        "f[0-3]",
    )
        .prop_map(|(dirs, file)| {
            let mut segments = dirs;
            segments.push(file);
            segments.join("/")
        });
    prop::collection::btree_map(path, prop::collection::vec(any::<u8>(), 0..256), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_import_export_roundtrip(files in arb_contents()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store_dir = TempDir::new().unwrap();
            let cache = TreeStore::new(DiskStore::init(store_dir.path()).unwrap());
            let source = create_dir(&files);
            let tree = cache.import_tree(source.path(), &ImportFilter::new()).await.unwrap();

            let dest = TempDir::new().unwrap();
            cache.export_tree(&tree, dest.path(), &ExportOptions::new()).await.unwrap();
            assert_eq!(read_dir(dest.path()), files);

            let again = cache.import_tree(dest.path(), &ImportFilter::new()).await.unwrap();
            assert_eq!(again, tree);
        });
    }
}
