//! Integration test: build a component archive and read it back.

use std::sync::Arc;

use ocm_core::compdesc::ResourceRelation;
use ocm_core::{ElementMeta, Identity, Resource};
use ocm_runtime::repositories::ComponentArchiveSpec;
use ocm_runtime::{
    AccessMode, BlobAccess, ComponentArchive, ComponentVersionAccess, FileFormat, MemoryBlob,
    OcmContext, Repository, RepositorySpec,
};
use tempfile::TempDir;

const COMPONENT: &str = "github.com/acme/app";

fn build(ctx: &Arc<OcmContext>, path: &std::path::Path, format: FileFormat) {
    let archive = ComponentArchive::create(ctx, path, format, COMPONENT, "1.0.0", "acme").unwrap();
    let cv = archive.version();
    cv.set_resource_blob(
        Resource::new(ElementMeta::new("image", ""), "ociImage", ResourceRelation::local()),
        &MemoryBlob::new("hello", "application/octet-stream"),
        None,
        None,
    )
    .unwrap();

    let desc = cv.get_descriptor().unwrap();
    assert_eq!(desc.component.resources[0].meta.version, "1.0.0");
    archive.close().unwrap();
}

#[test]
fn test_archive_round_trip() {
    for format in [FileFormat::Directory, FileFormat::Tar, FileFormat::Tgz] {
        let ctx = OcmContext::builder().build();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("archive");
        build(&ctx, &path, format);

        let first = ComponentArchive::open_path(&ctx, &path, AccessMode::ReadOnly).unwrap();
        let desc = first.version().get_descriptor().unwrap();
        assert_eq!(desc.component.name, COMPONENT);
        assert_eq!(desc.component.provider, "acme");
        assert_eq!(desc.component.resources.len(), 1);
        let method = first
            .version()
            .resource_access_method(&Identity::new("image"))
            .unwrap();
        assert_eq!(method.get().unwrap(), b"hello");
        first.close().unwrap();

        let second = ComponentArchive::open_path(&ctx, &path, AccessMode::ReadOnly).unwrap();
        assert_eq!(second.version().get_descriptor().unwrap(), desc);
        second.close().unwrap();
    }
}

#[test]
fn test_archive_through_repository_spec() {
    let ctx = OcmContext::builder().build();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("archive.tgz");
    build(&ctx, &path, FileFormat::Tgz);

    let spec = ComponentArchiveSpec::new(&path.to_string_lossy(), AccessMode::ReadOnly);
    let data = serde_json::to_vec(&spec).unwrap();
    let repo = ctx.repository_for_data(&data).unwrap();
    assert!(matches!(repo.get_specification(), RepositorySpec::ComponentArchive(_)));
    assert_eq!(repo.list_components().unwrap(), vec![COMPONENT]);

    let cv = repo.lookup_component_version(COMPONENT, "1.0.0").unwrap();
    let res = cv.get_resource(&Identity::new("image")).unwrap();
    assert_eq!(res.resource_type, "ociImage");
    assert!(repo.lookup_component_version(COMPONENT, "2.0.0").is_err());
    repo.close().unwrap();
}
