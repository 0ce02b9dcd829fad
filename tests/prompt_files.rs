use std::fs;

use burn_foundry::{PROMPTFILE_PREFIX, PromptError, load_prompts};
use tempfile::tempdir;

#[test]
fn file_entries_expand_in_place() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("prompts.txt");
    fs::write(&path, "first prompt\n|||second prompt\n|||").expect("write prompts");
    let file_entry = format!("{PROMPTFILE_PREFIX}{}", path.display());

    let prompts = load_prompts(&["hello", file_entry.as_str(), "goodbye"], Some("|||")).expect("load");
    assert_eq!(
        prompts,
        vec!["hello", "first prompt\n", "second prompt\n", "goodbye"]
    );
}

#[test]
fn whole_file_is_one_prompt_without_delimiter() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("prompt.txt");
    fs::write(&path, "a|||b").expect("write prompt");

    let prompts = load_prompts(&[format!("file::{}", path.display())], None).expect("load");
    assert_eq!(prompts, vec!["a|||b"]);
}

#[test]
fn literal_prompts_pass_through() {
    let prompts = load_prompts(&["just text", "more text"], Some("|")).expect("load");
    assert_eq!(prompts, vec!["just text", "more text"]);
    assert!(load_prompts::<&str>(&[], None).expect("load").is_empty());
}

#[test]
fn missing_file_fails_the_whole_list() {
    let dir = tempdir().expect("tempdir");
    let missing = format!("file::{}", dir.path().join("missing.txt").display());
    let err = load_prompts(&["ok", missing.as_str()], None).unwrap_err();
    assert!(matches!(err, PromptError::NotFound(_)));
    assert!(err.to_string().contains("missing.txt"));
}
