//! Path index bridge: bulk build, incremental listening, filtered
//! queries over an ordered store.

use std::collections::BTreeSet;

use strata::index::{MemoryStore, OrderedStore, PathFilter, PathIndex};
use strata::node::{NodeKind, QName, ROOT_KEY};
use strata::summary::{find_child, SUMMARY_ROOT};
use strata::trx::RecordSource;
use strata::{Resource, ResourceSettings, Result, TreeWriter};

fn path_of<S: RecordSource>(src: &mut S, steps: &[&str]) -> Result<u64> {
    let mut at = SUMMARY_ROOT;
    for name in steps {
        at = find_child(src, at, &QName::local(*name), NodeKind::Element)?
            .expect("path step must exist");
    }
    Ok(at)
}

#[test]
fn build_from_existing_document_groups_nodes_by_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;

    let mut writer = TreeWriter::new(resource.begin_write()?);
    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b1 = writer.insert_element_first_child(a, QName::local("b"))?;
    let b2 = writer.insert_element_right_sibling(b1, QName::local("b"))?;
    writer.insert_attribute(b1, QName::local("id"), "1")?;
    writer.commit()?;

    let mut trx = resource.begin_read()?;
    let mut index = PathIndex::new(MemoryStore::new());
    index.build(&mut trx)?;

    let b_path = path_of(&mut trx, &["a", "b"])?;
    let entry = index.store().get(b_path)?.expect("indexed path");
    assert_eq!(entry.nodes, BTreeSet::from([b1, b2]));
    // Both element paths plus the attribute path are present.
    assert_eq!(index.store().len(), 3);
    Ok(())
}

#[test]
fn listener_matches_a_fresh_rebuild_after_edits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;

    let mut incremental = PathIndex::new(MemoryStore::new());

    let mut writer = TreeWriter::new(resource.begin_write()?);
    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_attribute(b, QName::local("id"), "1")?;
    incremental.listen(writer.drain_events())?;

    writer.set_name(b, QName::local("c"))?;
    let c2 = writer.insert_element_first_child(a, QName::local("c"))?;
    writer.remove(c2)?;
    incremental.listen(writer.drain_events())?;
    writer.commit()?;

    let mut trx = resource.begin_read()?;
    let mut rebuilt = PathIndex::new(MemoryStore::new());
    rebuilt.build(&mut trx)?;

    let incremental_entries: Vec<_> = incremental
        .open_for_query(None)
        .map(|(k, v)| (k, v.clone()))
        .collect();
    let rebuilt_entries: Vec<_> = rebuilt
        .open_for_query(None)
        .map(|(k, v)| (k, v.clone()))
        .collect();
    assert_eq!(
        incremental_entries, rebuilt_entries,
        "the event stream must keep the index identical to a rebuild"
    );
    Ok(())
}

#[test]
fn query_narrows_to_the_filtered_paths() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let resource = Resource::create(dir.path(), ResourceSettings::default())?;

    let mut writer = TreeWriter::new(resource.begin_write()?);
    let a = writer.insert_element_first_child(ROOT_KEY, QName::local("a"))?;
    let b = writer.insert_element_first_child(a, QName::local("b"))?;
    writer.insert_element_first_child(a, QName::local("c"))?;
    writer.commit()?;

    let mut trx = resource.begin_read()?;
    let mut index = PathIndex::new(MemoryStore::new());
    index.build(&mut trx)?;

    let b_path = path_of(&mut trx, &["a", "b"])?;
    let filter = PathFilter::new([b_path]);
    let hits: Vec<_> = index.open_for_query(Some(&filter)).collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, b_path);
    assert_eq!(hits[0].1.nodes, BTreeSet::from([b]));
    Ok(())
}
