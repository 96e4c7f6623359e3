use crate::{helpers, Error};
use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};
use nginx_ingress_core::model::{
    v1::IngressNginxConfig,
    v2::{TransportServerConfig, VirtualServerConfig},
    MainConfig,
};
use std::{fmt, path::PathBuf};

const BUNDLED_MAIN: &str = include_str!("../templates/nginx.conf.tmpl");
const BUNDLED_INGRESS: &str = include_str!("../templates/ingress.tmpl");
const BUNDLED_VIRTUAL_SERVER: &str = include_str!("../templates/virtualserver.tmpl");
const BUNDLED_TRANSPORT_SERVER: &str = include_str!("../templates/transportserver.tmpl");

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Main,
    Ingress,
    VirtualServer,
    TransportServer,
}

/// Template files to load instead of the bundled templates.
#[derive(Clone, Debug, Default)]
pub struct TemplatePaths {
    pub main: Option<PathBuf>,
    pub ingress: Option<PathBuf>,
    pub virtual_server: Option<PathBuf>,
    pub transport_server: Option<PathBuf>,
}

/// Holds the active template of each family and the one loaded at startup.
pub struct Engine {
    env: Environment<'static>,
    originals: [String; 4],
}

// === impl Family ===

impl Family {
    const ALL: [Family; 4] = [
        Family::Main,
        Family::Ingress,
        Family::VirtualServer,
        Family::TransportServer,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Ingress => "ingress",
            Self::VirtualServer => "virtualserver",
            Self::TransportServer => "transportserver",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn bundled(&self) -> &'static str {
        match self {
            Self::Main => BUNDLED_MAIN,
            Self::Ingress => BUNDLED_INGRESS,
            Self::VirtualServer => BUNDLED_VIRTUAL_SERVER,
            Self::TransportServer => BUNDLED_TRANSPORT_SERVER,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// === impl TemplatePaths ===

impl TemplatePaths {
    fn get(&self, family: Family) -> Option<&PathBuf> {
        match family {
            Family::Main => self.main.as_ref(),
            Family::Ingress => self.ingress.as_ref(),
            Family::VirtualServer => self.virtual_server.as_ref(),
            Family::TransportServer => self.transport_server.as_ref(),
        }
    }
}

// === impl Engine ===

impl Engine {
    /// Loads each family from its configured path, falling back to the bundled template.
    pub fn new(paths: &TemplatePaths) -> Result<Self, Error> {
        let mut env = mk_env();
        let mut originals: [String; 4] = Default::default();
        for family in Family::ALL {
            let source = match paths.get(family) {
                Some(path) => std::fs::read_to_string(path).map_err(|source| Error::Read {
                    family,
                    path: path.clone(),
                    source,
                })?,
                None => family.bundled().to_string(),
            };
            env.add_template_owned(family.name(), source.clone())
                .map_err(|source| Error::Parse { family, source })?;
            originals[family.index()] = source;
        }

        Ok(Self { env, originals })
    }

    /// Loads the bundled templates.
    pub fn bundled() -> Result<Self, Error> {
        Self::new(&TemplatePaths::default())
    }

    pub fn execute_main(&self, config: &MainConfig) -> Result<Vec<u8>, Error> {
        self.execute(Family::Main, Value::from_serialize(config))
    }

    pub fn execute_ingress(&self, config: &IngressNginxConfig) -> Result<Vec<u8>, Error> {
        self.execute(Family::Ingress, Value::from_serialize(config))
    }

    pub fn execute_virtual_server(&self, config: &VirtualServerConfig) -> Result<Vec<u8>, Error> {
        self.execute(Family::VirtualServer, Value::from_serialize(config))
    }

    pub fn execute_transport_server(
        &self,
        config: &TransportServerConfig,
    ) -> Result<Vec<u8>, Error> {
        self.execute(Family::TransportServer, Value::from_serialize(config))
    }

    /// Replaces the active template of a family. A template that fails to parse leaves the
    /// active template in place.
    pub fn update(&mut self, family: Family, source: String) -> Result<(), Error> {
        // Parse in a scratch environment so a bad template never replaces a good one.
        let mut scratch = mk_env();
        scratch
            .add_template_owned(family.name(), source.clone())
            .map_err(|source| Error::Parse { family, source })?;

        self.env
            .add_template_owned(family.name(), source)
            .map_err(|source| Error::Parse { family, source })?;
        tracing::debug!(%family, "Updated template");
        Ok(())
    }

    /// Restores the template a family was loaded with.
    pub fn revert(&mut self, family: Family) -> Result<(), Error> {
        let source = self.originals[family.index()].clone();
        self.env
            .add_template_owned(family.name(), source)
            .map_err(|source| Error::Parse { family, source })?;
        tracing::debug!(%family, "Reverted template");
        Ok(())
    }

    fn execute(&self, family: Family, ctx: Value) -> Result<Vec<u8>, Error> {
        let tmpl = self
            .env
            .get_template(family.name())
            .map_err(|source| Error::Exec { family, source })?;
        let rendered = tmpl
            .render(ctx)
            .map_err(|source| Error::Exec { family, source })?;
        Ok(rendered.into_bytes())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

fn mk_env() -> Environment<'static> {
    let mut env = Environment::empty();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    helpers::register(&mut env);
    env
}
