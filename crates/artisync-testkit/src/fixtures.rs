//! Test fixtures: a canned server peer and in-process sessions.

use artisync_auth::{legacy_derive, CapabilitySet, MemoryCredentials};
use artisync_core::{delta_encode, hash_one_shot, ArtifactName, HashAlgorithm};
use artisync_store::{MemoryStore, Store};
use artisync_sync::{
    handle_request, sync, ClientOptions, LocalTransport, NullCrosslink, Result, ServerOptions,
    SyncOutcome,
};

/// Server code used by all fixtures.
pub const TEST_SERVER_CODE: &str = "5eedc0de5eedc0de5eedc0de5eedc0de5eedc0de";
/// Project code used by all fixtures.
pub const TEST_PROJECT_CODE: &str = "ba5eba11ba5eba11ba5eba11ba5eba11ba5eba11";

/// One server peer: store, credentials and handler options.
pub struct ServerFixture {
    pub store: MemoryStore,
    pub creds: MemoryCredentials,
    pub opts: ServerOptions,
}

impl ServerFixture {
    /// A server whose anonymous callers may read and clone.
    pub fn new() -> Self {
        let mut opts = ServerOptions::new(TEST_SERVER_CODE, TEST_PROJECT_CODE);
        opts.default_caps = CapabilitySet::anonymous();
        Self {
            store: MemoryStore::new(),
            creds: MemoryCredentials::new(),
            opts,
        }
    }

    /// A server whose anonymous callers may also push. Convenient for
    /// exercising the engines without login scaffolding.
    pub fn writable() -> Self {
        let mut fixture = Self::new();
        fixture.opts.default_caps = CapabilitySet::from_cap_string("rwc");
        fixture
    }

    /// Register a user; the stored secret is the derived form, as a
    /// fresh install would keep it.
    pub fn add_user(&mut self, login: &str, password: &str, caps: &str) -> String {
        let secret = legacy_derive(password, login);
        self.creds.add(login, &secret, caps);
        secret
    }

    pub fn add_artifact(&mut self, content: &[u8]) -> ArtifactName {
        self.add_artifact_with(content, HashAlgorithm::Sha1)
    }

    pub fn add_artifact_with(&mut self, content: &[u8], algo: HashAlgorithm) -> ArtifactName {
        let name = hash_one_shot(content, algo);
        self.store.put(content, &name, None, false).unwrap();
        name
    }

    pub fn add_private_artifact(&mut self, content: &[u8]) -> ArtifactName {
        let name = hash_one_shot(content, HashAlgorithm::Sha1);
        self.store.put(content, &name, None, true).unwrap();
        name
    }

    /// Store `target` as a native delta against `basis` (inserting the
    /// basis as a literal first). Returns `(basis, target)` names.
    pub fn add_delta_artifact(
        &mut self,
        basis: &[u8],
        target: &[u8],
    ) -> (ArtifactName, ArtifactName) {
        let basis_name = self.add_artifact(basis);
        let basis_id = self.store.resolve(&basis_name).unwrap().unwrap();
        let target_name = hash_one_shot(target, HashAlgorithm::Sha1);
        let patch = delta_encode(basis, target);
        self.store
            .put_delta(&patch, &target_name, basis_id, false)
            .unwrap();
        (basis_name, target_name)
    }

    /// Whether the store holds materialized content for `name`.
    pub fn holds(&self, name: &ArtifactName) -> bool {
        holds(&self.store, name)
    }

    /// Feed one raw request through the handler.
    pub fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        handle_request(
            &mut self.store,
            &self.creds,
            &mut NullCrosslink,
            &self.opts,
            request,
        )
    }
}

impl Default for ServerFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a store holds materialized content for `name`.
pub fn holds<S: Store>(store: &S, name: &ArtifactName) -> bool {
    match store.resolve(name) {
        Ok(Some(id)) => matches!(store.content(id), Ok(Some(_))),
        _ => false,
    }
}

/// Insert a public artifact into any store and return its name.
pub fn seed<S: Store>(store: &mut S, content: &[u8]) -> ArtifactName {
    let name = hash_one_shot(content, HashAlgorithm::Sha1);
    store.put(content, &name, None, false).unwrap();
    name
}

/// Run a complete client session against the fixture server over the
/// in-process loopback transport.
pub fn run_session(
    client: &mut MemoryStore,
    server: &mut ServerFixture,
    opts: &ClientOptions,
) -> Result<SyncOutcome> {
    let ServerFixture { store, creds, opts: server_opts } = server;
    let mut transport = LocalTransport::new(|request: &[u8]| {
        handle_request(store, creds, &mut NullCrosslink, server_opts, request)
    });
    sync(client, &mut transport, &mut NullCrosslink, opts)
}

/// Client options pointed at the fixture server's project.
pub fn client_options(flags: artisync_sync::SyncFlags) -> ClientOptions {
    let mut opts = ClientOptions::new(flags);
    opts.server_code = TEST_SERVER_CODE.to_owned();
    opts.project_code = Some(TEST_PROJECT_CODE.to_owned());
    opts
}
