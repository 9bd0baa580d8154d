//! Path-summary maintenance under inserts, renames, moves and deletes,
//! including the reference-count invariant under randomized edits.

use std::collections::{BTreeMap, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use strata::node::{NodeKind, QName, RecordBody, ROOT_KEY};
use strata::page::SubtreeKind;
use strata::summary::{children, find_child, references, PathSummaryWriter, SUMMARY_ROOT};
use strata::trx::RecordSource;
use strata::{Resource, ResourceSettings, Result, StrataError, TreeWriter};

/// Path key at the end of a `{name, kind}` step sequence, if present.
fn path_of<S: RecordSource>(src: &mut S, steps: &[(&str, NodeKind)]) -> Result<Option<u64>> {
    let mut at = SUMMARY_ROOT;
    for (name, kind) in steps {
        match find_child(src, at, &QName::local(*name), *kind)? {
            Some(next) => at = next,
            None => return Ok(None),
        }
    }
    Ok(Some(at))
}

fn refs_at<S: RecordSource>(src: &mut S, steps: &[(&str, NodeKind)]) -> Result<u64> {
    let key = path_of(src, steps)?.expect("path must exist");
    references(src, key)
}

/// Live name-bearing primary nodes grouped by the path they reference.
fn primary_path_counts<S: RecordSource>(src: &mut S) -> Result<BTreeMap<u64, u64>> {
    let mut counts = BTreeMap::new();
    let mut queue = VecDeque::from([ROOT_KEY]);
    while let Some(key) = queue.pop_front() {
        let record = src
            .record(SubtreeKind::Document, key)?
            .expect("walk reached a missing record");
        if let Some(path) = record.path_node_key() {
            *counts.entry(path).or_insert(0) += 1;
        }
        if let RecordBody::Element(element) = &record.body {
            queue.extend(element.attributes.iter().copied());
            queue.extend(element.namespaces.iter().copied());
        }
        let mut child = record.first_child();
        while let Some(child_key) = child {
            queue.push_back(child_key);
            child = src
                .record(SubtreeKind::Document, child_key)?
                .expect("sibling link to a missing record")
                .right_sibling();
        }
    }
    Ok(counts)
}

/// Reference count of every path node below the summary root.
fn summary_ref_counts<S: RecordSource>(src: &mut S) -> Result<BTreeMap<u64, u64>> {
    let mut counts = BTreeMap::new();
    let mut queue = VecDeque::from([SUMMARY_ROOT]);
    while let Some(key) = queue.pop_front() {
        for child in children(src, key)? {
            counts.insert(child, references(src, child)?);
            queue.push_back(child);
        }
    }
    Ok(counts)
}

/// Every path node's count equals the number of live primary nodes
/// realizing it, and no referenceless path node survives.
fn assert_invariant<S: RecordSource>(src: &mut S) -> Result<()> {
    let primary = primary_path_counts(src)?;
    let summary = summary_ref_counts(src)?;
    assert_eq!(
        summary, primary,
        "path node reference counts must mirror the live primary tree"
    );
    Ok(())
}

const EL: NodeKind = NodeKind::Element;
const AT: NodeKind = NodeKind::Attribute;

#[test]
fn get_or_create_twice_returns_same_node_and_counts_twice() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut trx = resource.begin_write()?;

    let name = QName::local("section");
    let first = PathSummaryWriter::get_or_create_path_node(&mut trx, SUMMARY_ROOT, &name, EL)?;
    let second = PathSummaryWriter::get_or_create_path_node(&mut trx, SUMMARY_ROOT, &name, EL)?;
    assert_eq!(first, second, "same {{name, kind}} under one parent shares a node");
    assert_eq!(references(&mut trx, first)?, 2);
    Ok(())
}

#[test]
fn equal_paths_share_nodes_and_counts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b1 = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_right_sibling(b1, QName::local("b"))?;
    writer.insert_element_first_child(a, QName::local("c"))?;

    let trx = writer.trx_mut();
    assert_eq!(refs_at(trx, &[("a", EL)])?, 1);
    assert_eq!(refs_at(trx, &[("a", EL), ("b", EL)])?, 2);
    assert_eq!(refs_at(trx, &[("a", EL), ("c", EL)])?, 1);
    assert_invariant(trx)
}

#[test]
fn rename_without_target_renames_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    let old_path = path_of(writer.trx_mut(), &[("a", EL), ("b", EL)])?.expect("path of b");

    writer.set_name(b, QName::local("c"))?;

    let trx = writer.trx_mut();
    assert_eq!(
        path_of(trx, &[("a", EL), ("c", EL)])?,
        Some(old_path),
        "rename in place keeps the path node's key"
    );
    assert_eq!(references(trx, old_path)?, 1);
    assert_eq!(path_of(trx, &[("a", EL), ("b", EL)])?, None);
    let node = trx
        .get_record(SubtreeKind::Document, b)?
        .expect("renamed node");
    assert_eq!(node.name().map(|n| n.local.as_str()), Some("c"));
    assert_eq!(node.path_node_key(), Some(old_path));
    assert_invariant(trx)
}

#[test]
fn rename_merges_into_existing_sibling_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_first_child(a, QName::local("c"))?;
    let c_path = path_of(writer.trx_mut(), &[("a", EL), ("c", EL)])?.expect("path of c");

    writer.set_name(b, QName::local("c"))?;

    let trx = writer.trx_mut();
    assert_eq!(references(trx, c_path)?, 2, "merge adds the renamed node's count");
    assert_eq!(path_of(trx, &[("a", EL), ("b", EL)])?, None, "old path node is deleted");
    let node = trx.get_record(SubtreeKind::Document, b)?.expect("renamed node");
    assert_eq!(node.path_node_key(), Some(c_path), "node re-points to the merged path");
    assert_invariant(trx)
}

#[test]
fn rename_of_shared_path_splits_counts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b1 = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_right_sibling(b1, QName::local("b"))?;
    assert_eq!(refs_at(writer.trx_mut(), &[("a", EL), ("b", EL)])?, 2);

    writer.set_name(b1, QName::local("c"))?;

    let trx = writer.trx_mut();
    assert_eq!(refs_at(trx, &[("a", EL), ("b", EL)])?, 1);
    assert_eq!(refs_at(trx, &[("a", EL), ("c", EL)])?, 1);
    assert_invariant(trx)
}

#[test]
fn rename_merges_whole_subtrees_level_by_level() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    let bx = writer.insert_element_first_child(b, QName::local("x"))?;
    writer.insert_attribute(bx, QName::local("id"), "1")?;
    let c = writer.insert_element_first_child(a, QName::local("c"))?;
    let cx = writer.insert_element_first_child(c, QName::local("x"))?;
    writer.insert_attribute(cx, QName::local("id"), "2")?;

    writer.set_name(b, QName::local("c"))?;

    let trx = writer.trx_mut();
    assert_eq!(refs_at(trx, &[("a", EL), ("c", EL)])?, 2);
    assert_eq!(refs_at(trx, &[("a", EL), ("c", EL), ("x", EL)])?, 2);
    assert_eq!(
        refs_at(trx, &[("a", EL), ("c", EL), ("x", EL), ("id", AT)])?,
        2,
        "attribute paths merge along with their elements"
    );
    assert_eq!(path_of(trx, &[("a", EL), ("b", EL)])?, None);
    let moved = trx.get_record(SubtreeKind::Document, bx)?.expect("descendant");
    let kept = trx.get_record(SubtreeKind::Document, cx)?.expect("descendant");
    assert_eq!(
        moved.path_node_key(),
        kept.path_node_key(),
        "descendants of the merged subtrees share path nodes"
    );
    assert_invariant(trx)
}

#[test]
fn same_level_move_changes_no_reference_count() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_first_child(b, QName::local("x"))?;
    let c = writer.insert_element_right_sibling(b, QName::local("c"))?;
    let before = summary_ref_counts(writer.trx_mut())?;

    writer.move_to_right_sibling(b, c)?;

    let trx = writer.trx_mut();
    assert_eq!(
        summary_ref_counts(trx)?,
        before,
        "reordering siblings must leave every count untouched"
    );
    assert_invariant(trx)
}

#[test]
fn cross_level_move_without_target_rebuilds_paths() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_first_child(b, QName::local("x"))?;

    writer.move_to_first_child(b, ROOT_KEY)?;

    let trx = writer.trx_mut();
    assert_eq!(refs_at(trx, &[("b", EL)])?, 1);
    assert_eq!(refs_at(trx, &[("b", EL), ("x", EL)])?, 1);
    assert_eq!(path_of(trx, &[("a", EL), ("b", EL)])?, None);
    assert_eq!(refs_at(trx, &[("a", EL)])?, 1, "the abandoned parent keeps its own count");
    assert_invariant(trx)
}

#[test]
fn cross_level_move_merges_into_existing_target() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let moved = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_attribute(moved, QName::local("id"), "1")?;
    let c = writer.insert_element_right_sibling(a, QName::local("c"))?;
    let existing = writer.insert_element_first_child(c, QName::local("b"))?;
    writer.insert_attribute(existing, QName::local("id"), "2")?;

    writer.move_to_first_child(moved, c)?;

    let trx = writer.trx_mut();
    assert_eq!(refs_at(trx, &[("c", EL), ("b", EL)])?, 2);
    assert_eq!(refs_at(trx, &[("c", EL), ("b", EL), ("id", AT)])?, 2);
    assert_eq!(path_of(trx, &[("a", EL), ("b", EL)])?, None);
    assert_invariant(trx)
}

#[test]
fn deleting_the_last_reference_removes_the_path_subtree() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_attribute(b, QName::local("id"), "1")?;

    writer.remove(a)?;

    let trx = writer.trx_mut();
    assert_eq!(
        children(trx, SUMMARY_ROOT)?.len(),
        0,
        "no referenceless path nodes may survive"
    );
    assert_invariant(trx)
}

#[test]
fn deleting_a_shared_reference_only_decrements() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b1 = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_right_sibling(b1, QName::local("b"))?;

    writer.remove(b1)?;

    let trx = writer.trx_mut();
    assert_eq!(refs_at(trx, &[("a", EL), ("b", EL)])?, 1);
    assert_invariant(trx)
}

#[test]
fn namespace_paths_match_by_prefix_alone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut writer = TreeWriter::new(resource.begin_write()?);

    let a1 = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    writer.insert_namespace(a1, QName::new("urn:one", "p", ""))?;
    let a2 = writer.insert_element_right_sibling(a1, QName::local("a"))?;
    writer.insert_namespace(a2, QName::new("urn:two", "p", ""))?;

    let trx = writer.trx_mut();
    let a_path = path_of(trx, &[("a", EL)])?.expect("path of a");
    let ns_path = find_child(trx, a_path, &QName::new("", "p", ""), NodeKind::Namespace)?
        .expect("namespace path");
    assert_eq!(
        references(trx, ns_path)?,
        2,
        "declarations with one prefix share a path regardless of uri"
    );
    assert_invariant(trx)
}

#[test]
fn committed_summary_is_readable_and_consistent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;

    let mut writer = TreeWriter::new(resource.begin_write()?);
    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_attribute(b, QName::local("id"), "1")?;
    writer.set_name(b, QName::local("c"))?;
    writer.commit()?;
    drop(resource);

    let reopened = Resource::open(dir.path())?;
    let mut trx = reopened.begin_read()?;
    assert_eq!(refs_at(&mut trx, &[("a", EL), ("c", EL)])?, 1);
    assert_eq!(path_of(&mut trx, &[("a", EL), ("b", EL)])?, None);
    assert_invariant(&mut trx)
}

#[test]
fn randomized_edits_preserve_the_invariant_across_commits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;
    let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);
    let names = ["a", "b", "c", "d"];

    for round in 0..4 {
        let mut writer = TreeWriter::new(resource.begin_write()?);
        let mut elements: Vec<u64> = Vec::new();
        // Rediscover the committed elements of earlier rounds.
        {
            let trx = writer.trx_mut();
            let mut queue = VecDeque::from([ROOT_KEY]);
            while let Some(key) = queue.pop_front() {
                let record = trx
                    .get_record(SubtreeKind::Document, key)?
                    .expect("live node");
                if record.kind() == NodeKind::Element {
                    elements.push(key);
                }
                let mut child = record.first_child();
                while let Some(child_key) = child {
                    queue.push_back(child_key);
                    child = trx
                        .get_record(SubtreeKind::Document, child_key)?
                        .expect("sibling")
                        .right_sibling();
                }
            }
        }

        for _ in 0..50 {
            let name = QName::local(names[rng.gen_range(0..names.len())]);
            match rng.gen_range(0..10) {
                0..=3 => {
                    let parent = if elements.is_empty() || rng.gen_bool(0.2) {
                        ROOT_KEY
                    } else {
                        elements[rng.gen_range(0..elements.len())]
                    };
                    let key = writer.insert_element_first_child(parent, name)?;
                    elements.push(key);
                }
                4..=5 => {
                    if let Some(&el) = pick(&elements, &mut rng) {
                        writer.insert_attribute(el, name, "v")?;
                    }
                }
                6..=7 => {
                    if let Some(&el) = pick(&elements, &mut rng) {
                        writer.set_name(el, name)?;
                    }
                }
                8 => {
                    if let Some(&el) = pick(&elements, &mut rng) {
                        writer.remove(el)?;
                        let mut alive = Vec::new();
                        for key in elements.drain(..) {
                            if writer.record(key)?.is_some() {
                                alive.push(key);
                            }
                        }
                        elements = alive;
                    }
                }
                _ => {
                    if elements.len() >= 2 {
                        let node = elements[rng.gen_range(0..elements.len())];
                        let target = if rng.gen_bool(0.3) {
                            ROOT_KEY
                        } else {
                            elements[rng.gen_range(0..elements.len())]
                        };
                        match writer.move_to_first_child(node, target) {
                            Ok(()) | Err(StrataError::InvalidArgument(_)) => {}
                            Err(other) => return Err(other),
                        }
                    }
                }
            }
            assert_invariant(writer.trx_mut())?;
        }

        writer.commit()?;
        let mut trx = resource.begin_read()?;
        assert_invariant(&mut trx)?;
        assert_eq!(trx.revision(), round + 2);
    }
    Ok(())
}

fn pick<'a, T>(items: &'a [T], rng: &mut ChaCha8Rng) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.gen_range(0..items.len())])
    }
}
