//! High-level pipeline: walks the loaded documents and dispatches collaborator
//! commands for every entity that still needs work.
//!
//! Three operations exist, mirroring the CLI flags:
//!   - image upload (`qiita-image-upload --json ...`)
//!   - item post (`qiita-item --post --json ...`)
//!   - item patch (`qiita-item --patch <id> --json ...`)
//!
//! Each entity is guarded by idempotency checks before anything runs: an item
//! that already carries a platform `id` is never posted again, an image that
//! already has a `url` is never re-uploaded, and `stage: local` pins an entity
//! to this machine entirely. Entities are mutated in place with whatever
//! result keys the collaborator's JSON response carries, plus a fixed
//! `status: Ok` marker — never under dry-run.
//!
//! # Error Handling
//! Guards are silent no-ops. A collaborator whose output fails to parse as a
//! JSON object aborts the whole run; there is no retry and no partial-failure
//! recovery, so nothing processed so far reaches the output file.

use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::command::{CommandLine, CommandRunner};
use crate::document::{
    field, has_field, scalar_field, scalar_to_string, sequence_field_mut, set_field, str_field,
};

const ITEM_PROGRAM: &str = "qiita-item";
const IMAGE_PROGRAM: &str = "qiita-image-upload";

/// Marker written into an entity after its collaborator command ran.
const STATUS_OK: &str = "Ok";

/// Response keys merged back into an item after a post or patch.
const ITEM_RESULT_KEYS: &[&str] = &["title", "id", "url", "tags", "created_at", "updated_at"];
/// Response keys merged back into an image after an upload.
const IMAGE_RESULT_KEYS: &[&str] = &["name", "type", "url"];

/// Immutable per-run configuration, resolved once from the CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub verbose: bool,
    pub debug: bool,
    pub dry_run: bool,
    pub item_post: bool,
    pub item_patch: bool,
    pub image_upload: bool,
}

impl Options {
    fn echo_commands(&self) -> bool {
        self.verbose || self.debug || self.dry_run
    }
}

/// Runs every enabled operation over the documents, in document order.
/// Operations run in the fixed order image-upload, item-post, item-patch.
pub fn run_operations(
    options: &Options,
    runner: &dyn CommandRunner,
    documents: &mut [Value],
) -> Result<()> {
    if options.image_upload {
        info!("Starting image upload pass");
        for document in documents.iter_mut() {
            let Some(map) = document.as_mapping_mut() else {
                continue;
            };
            // Images nested under items first, then the document's own list.
            if let Some(items) = sequence_field_mut(map, "item_list") {
                for item in items {
                    let Some(item) = item.as_mapping_mut() else {
                        continue;
                    };
                    if let Some(images) = sequence_field_mut(item, "image_list") {
                        for image in images {
                            if let Some(image) = image.as_mapping_mut() {
                                image_upload(options, runner, image)?;
                            }
                        }
                    }
                }
            }
            if let Some(images) = sequence_field_mut(map, "image_list") {
                for image in images {
                    if let Some(image) = image.as_mapping_mut() {
                        image_upload(options, runner, image)?;
                    }
                }
            }
        }
    }
    if options.item_post {
        info!("Starting item post pass");
        for_each_item(documents, |item| item_post(options, runner, item))?;
    }
    if options.item_patch {
        info!("Starting item patch pass");
        for_each_item(documents, |item| item_patch(options, runner, item))?;
    }
    Ok(())
}

fn for_each_item<F>(documents: &mut [Value], mut op: F) -> Result<()>
where
    F: FnMut(&mut Mapping) -> Result<()>,
{
    for document in documents.iter_mut() {
        let Some(map) = document.as_mapping_mut() else {
            continue;
        };
        let Some(items) = sequence_field_mut(map, "item_list") else {
            continue;
        };
        for item in items {
            if let Some(item) = item.as_mapping_mut() {
                op(item)?;
            }
        }
    }
    Ok(())
}

/// Posts one item as a new article, unless a guard says it must not run.
pub fn item_post(options: &Options, runner: &dyn CommandRunner, item: &mut Mapping) -> Result<()> {
    if has_field(item, "id") {
        debug!("item already has an id, skipping post");
        return Ok(());
    }
    let Some(file_name) = scalar_field(item, "file_name") else {
        debug!("item has no file_name, skipping post");
        return Ok(());
    };
    if str_field(item, "stage") == Some("local") {
        debug!(file_name = %file_name, "item stage is local, skipping post");
        return Ok(());
    }

    let mut command = CommandLine::new(ITEM_PROGRAM);
    command.arg("--post").arg("--json");
    push_item_args(&mut command, item, &file_name);
    run_merging(options, runner, command, item, ITEM_RESULT_KEYS)
}

/// Patches one already-posted item, unless a guard says it must not run.
/// An absent or null `id` skips: there is no identifier to patch against.
pub fn item_patch(options: &Options, runner: &dyn CommandRunner, item: &mut Mapping) -> Result<()> {
    let Some(id) = scalar_field(item, "id") else {
        debug!("item has no usable id, skipping patch");
        return Ok(());
    };
    let Some(file_name) = scalar_field(item, "file_name") else {
        debug!("item has no file_name, skipping patch");
        return Ok(());
    };
    if str_field(item, "stage") == Some("local") {
        debug!(file_name = %file_name, "item stage is local, skipping patch");
        return Ok(());
    }

    let mut command = CommandLine::new(ITEM_PROGRAM);
    command.arg("--patch").arg(id).arg("--json");
    push_item_args(&mut command, item, &file_name);
    run_merging(options, runner, command, item, ITEM_RESULT_KEYS)
}

/// Uploads one image asset, unless a guard says it must not run.
pub fn image_upload(
    options: &Options,
    runner: &dyn CommandRunner,
    image: &mut Mapping,
) -> Result<()> {
    if has_field(image, "url") {
        debug!("image already has a url, skipping upload");
        return Ok(());
    }
    if str_field(image, "stage") == Some("local") {
        debug!("image stage is local, skipping upload");
        return Ok(());
    }
    let Some(file_name) = scalar_field(image, "file_name") else {
        debug!("image has no file_name, skipping upload");
        return Ok(());
    };

    let mut command = CommandLine::new(IMAGE_PROGRAM);
    command.arg("--json");
    if let Some(name) = str_field(image, "name") {
        command.arg("--name").arg_quoted(strip_quotes(name));
    }
    if let Some(kind) = str_field(image, "type") {
        command.arg("--type").arg_quoted(strip_quotes(kind));
    }
    command.arg(file_name);
    run_merging(options, runner, command, image, IMAGE_RESULT_KEYS)
}

/// Shared tail of post and patch: stage flag, tags in input order,
/// `--with_title`, then the trailing file name. The order is fixed and part
/// of the collaborator contract.
fn push_item_args(command: &mut CommandLine, item: &Mapping, file_name: &str) {
    match str_field(item, "stage") {
        Some("private") => {
            command.arg("--private");
        }
        Some("public") => {
            command.arg("--public");
        }
        _ => {}
    }
    if let Some(tags) = field(item, "tags").and_then(Value::as_sequence) {
        for tag in tags {
            if let Some(tag) = scalar_to_string(tag) {
                command.arg("--tags").arg(tag);
            }
        }
    }
    if field(item, "with_title") == Some(&Value::Bool(true)) {
        command.arg("--with_title");
    }
    command.arg(file_name);
}

/// Strips one layer of matching surrounding quotes, double quotes first, then
/// single. Unquoted input passes through unchanged.
fn strip_quotes(raw: &str) -> &str {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner;
    }
    if let Some(inner) = raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return inner;
    }
    raw
}

/// Echoes, executes (unless dry-run) and merges the collaborator's JSON
/// response into the entity, finishing with `status: Ok`.
fn run_merging(
    options: &Options,
    runner: &dyn CommandRunner,
    command: CommandLine,
    entity: &mut Mapping,
    result_keys: &[&str],
) -> Result<()> {
    if options.echo_commands() {
        println!("## {command}");
    }
    if options.dry_run {
        return Ok(());
    }

    info!(command = %command, "Running collaborator command");
    let stdout = runner.run(&command)?;
    let response: serde_json::Value = serde_json::from_str(&stdout)
        .with_context(|| format!("collaborator command `{command}` did not emit valid JSON"))?;
    let Some(response) = response.as_object() else {
        bail!("collaborator command `{command}` emitted non-object JSON");
    };

    for key in result_keys {
        if let Some(value) = response.get(*key) {
            let value = serde_yaml::to_value(value)
                .context("failed to convert collaborator response value")?;
            set_field(entity, key, value);
        }
    }
    set_field(entity, "status", Value::String(STATUS_OK.to_string()));
    debug!(command = %command, "Merged collaborator response");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MockCommandRunner;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).expect("test yaml")
    }

    fn never_runs() -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(0);
        runner
    }

    #[test]
    fn post_skips_item_with_existing_id() {
        let runner = never_runs();
        let mut item = mapping("file_name: a.md\nid: existing\n");
        let before = item.clone();

        item_post(&Options::default(), &runner, &mut item).expect("no-op");
        assert_eq!(item, before);
    }

    #[test]
    fn post_skips_item_without_file_name() {
        let runner = never_runs();
        let mut item = mapping("stage: public\n");
        let before = item.clone();

        item_post(&Options::default(), &runner, &mut item).expect("no-op");
        assert_eq!(item, before);
    }

    #[test]
    fn post_skips_local_stage() {
        let runner = never_runs();
        let mut item = mapping("file_name: a.md\nstage: local\n");

        item_post(&Options::default(), &runner, &mut item).expect("no-op");
        assert!(!has_field(&item, "status"));
    }

    #[test]
    fn post_assembles_arguments_in_fixed_order() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| {
                command.program() == "qiita-item"
                    && command.argv()
                        == [
                            "--post",
                            "--json",
                            "--public",
                            "--tags",
                            "rust",
                            "--tags",
                            "cli",
                            "--with_title",
                            "a.md",
                        ]
            })
            .times(1)
            .returning(|_| Ok(r#"{"id":"123","url":"https://x/123"}"#.to_string()));

        let mut item = mapping(
            "file_name: a.md\nstage: public\ntags:\n- rust\n- cli\nwith_title: true\n",
        );
        item_post(&Options::default(), &runner, &mut item).expect("post succeeds");

        assert_eq!(scalar_field(&item, "id"), Some("123".to_string()));
        assert_eq!(str_field(&item, "url"), Some("https://x/123"));
        assert_eq!(str_field(&item, "status"), Some("Ok"));
    }

    #[test]
    fn post_merges_only_keys_present_in_response() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Ok(r#"{"id":"123"}"#.to_string()));

        let mut item = mapping("file_name: a.md\nstage: public\n");
        item_post(&Options::default(), &runner, &mut item).expect("post succeeds");

        assert_eq!(scalar_field(&item, "id"), Some("123".to_string()));
        assert!(!has_field(&item, "title"));
        assert!(!has_field(&item, "created_at"));
        assert_eq!(str_field(&item, "status"), Some("Ok"));
    }

    #[test]
    fn post_omits_stage_flag_when_stage_absent() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| command.argv() == ["--post", "--json", "a.md"])
            .times(1)
            .returning(|_| Ok("{}".to_string()));

        let mut item = mapping("file_name: a.md\n");
        item_post(&Options::default(), &runner, &mut item).expect("post succeeds");
        assert_eq!(str_field(&item, "status"), Some("Ok"));
    }

    #[test]
    fn post_ignores_with_title_unless_exactly_true() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| command.argv() == ["--post", "--json", "--private", "a.md"])
            .times(1)
            .returning(|_| Ok("{}".to_string()));

        let mut item = mapping("file_name: a.md\nstage: private\nwith_title: false\n");
        item_post(&Options::default(), &runner, &mut item).expect("post succeeds");
    }

    #[test]
    fn post_fails_on_non_json_response() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(1)
            .returning(|_| Ok("502 Bad Gateway".to_string()));

        let mut item = mapping("file_name: a.md\n");
        let err = item_post(&Options::default(), &runner, &mut item).expect_err("parse fault");
        assert!(err.to_string().contains("valid JSON"));
    }

    #[test]
    fn patch_includes_id_and_same_flag_order() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| {
                command.argv()
                    == ["--patch", "123", "--json", "--private", "--tags", "rust", "a.md"]
            })
            .times(1)
            .returning(|_| Ok(r#"{"updated_at":"2026-08-26T00:00:00+09:00"}"#.to_string()));

        let mut item = mapping("file_name: a.md\nid: '123'\nstage: private\ntags:\n- rust\n");
        item_patch(&Options::default(), &runner, &mut item).expect("patch succeeds");

        assert_eq!(
            str_field(&item, "updated_at"),
            Some("2026-08-26T00:00:00+09:00")
        );
        assert_eq!(str_field(&item, "status"), Some("Ok"));
    }

    #[test]
    fn patch_skips_when_id_absent_or_null() {
        let runner = never_runs();

        let mut absent = mapping("file_name: a.md\n");
        item_patch(&Options::default(), &runner, &mut absent).expect("no-op");
        assert!(!has_field(&absent, "status"));

        let mut null_id = mapping("file_name: a.md\nid: null\n");
        item_patch(&Options::default(), &runner, &mut null_id).expect("no-op");
        assert!(!has_field(&null_id, "status"));
    }

    #[test]
    fn patch_skips_local_stage() {
        let runner = never_runs();
        let mut item = mapping("file_name: a.md\nid: '123'\nstage: local\n");
        item_patch(&Options::default(), &runner, &mut item).expect("no-op");
        assert!(!has_field(&item, "status"));
    }

    #[test]
    fn patch_renders_numeric_id() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| command.argv() == ["--patch", "123", "--json", "a.md"])
            .times(1)
            .returning(|_| Ok("{}".to_string()));

        let mut item = mapping("file_name: a.md\nid: 123\n");
        item_patch(&Options::default(), &runner, &mut item).expect("patch succeeds");
    }

    #[test]
    fn upload_skips_image_with_url_or_local_stage_or_no_file() {
        let runner = never_runs();

        let mut uploaded = mapping("file_name: p.png\nurl: https://x/p.png\n");
        image_upload(&Options::default(), &runner, &mut uploaded).expect("no-op");

        let mut local = mapping("file_name: p.png\nstage: local\n");
        image_upload(&Options::default(), &runner, &mut local).expect("no-op");

        let mut nameless = mapping("name: pic\n");
        image_upload(&Options::default(), &runner, &mut nameless).expect("no-op");
    }

    #[test]
    fn upload_strips_quotes_from_name_and_type() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| {
                command.program() == "qiita-image-upload"
                    && command.argv()
                        == ["--json", "--name", "pic", "--type", "image/png", "p.png"]
                    && command.to_string()
                        == "qiita-image-upload --json --name \"pic\" --type \"image/png\" p.png"
            })
            .times(1)
            .returning(|_| Ok(r#"{"url":"https://x/p.png"}"#.to_string()));

        let mut image = mapping("file_name: p.png\nname: '\"pic\"'\ntype: \"'image/png'\"\n");
        image_upload(&Options::default(), &runner, &mut image).expect("upload succeeds");

        assert_eq!(str_field(&image, "url"), Some("https://x/p.png"));
        assert_eq!(str_field(&image, "status"), Some("Ok"));
    }

    #[test]
    fn upload_passes_unquoted_name_through_unchanged() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|command| command.argv() == ["--json", "--name", "pic", "p.png"])
            .times(1)
            .returning(|_| Ok("{}".to_string()));

        let mut image = mapping("file_name: p.png\nname: pic\n");
        image_upload(&Options::default(), &runner, &mut image).expect("upload succeeds");
    }

    #[test]
    fn strip_quotes_handles_edge_shapes() {
        assert_eq!(strip_quotes("\"pic\""), "pic");
        assert_eq!(strip_quotes("'pic'"), "pic");
        assert_eq!(strip_quotes("pic"), "pic");
        assert_eq!(strip_quotes("\""), "\"");
        assert_eq!(strip_quotes(""), "");
    }

    #[test]
    fn dry_run_executes_nothing_and_mutates_nothing() {
        let runner = never_runs();
        let options = Options {
            dry_run: true,
            ..Options::default()
        };

        let mut item = mapping("file_name: a.md\nstage: public\n");
        let before = item.clone();
        item_post(&options, &runner, &mut item).expect("dry-run is a no-op");
        assert_eq!(item, before);

        let mut image = mapping("file_name: p.png\n");
        let before = image.clone();
        image_upload(&options, &runner, &mut image).expect("dry-run is a no-op");
        assert_eq!(image, before);
    }

    #[test]
    fn run_operations_walks_nested_and_top_level_image_lists() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_| Ok(r#"{"url":"https://x/up.png"}"#.to_string()));

        let options = Options {
            image_upload: true,
            ..Options::default()
        };
        let mut documents = vec![serde_yaml::from_str::<Value>(
            "item_list:\n- file_name: a.md\n  image_list:\n  - file_name: nested.png\nimage_list:\n- file_name: top.png\n",
        )
        .expect("yaml")];

        run_operations(&options, &runner, &mut documents).expect("walk succeeds");

        let map = documents[0].as_mapping().expect("mapping");
        let items = field(map, "item_list").and_then(Value::as_sequence).expect("items");
        let nested = items[0]
            .as_mapping()
            .and_then(|item| field(item, "image_list"))
            .and_then(Value::as_sequence)
            .expect("nested images");
        assert_eq!(
            nested[0].as_mapping().and_then(|i| str_field(i, "url")),
            Some("https://x/up.png")
        );
        let top = field(map, "image_list").and_then(Value::as_sequence).expect("top images");
        assert_eq!(
            top[0].as_mapping().and_then(|i| str_field(i, "status")),
            Some("Ok")
        );
    }

    #[test]
    fn run_operations_leaves_documents_without_item_list_untouched() {
        let runner = never_runs();
        let options = Options {
            item_post: true,
            item_patch: true,
            image_upload: true,
            ..Options::default()
        };
        let mut documents =
            vec![serde_yaml::from_str::<Value>("title: notes\nbody: plain\n").expect("yaml")];
        let before = documents.clone();

        run_operations(&options, &runner, &mut documents).expect("walk succeeds");
        assert_eq!(documents, before);
    }
}
