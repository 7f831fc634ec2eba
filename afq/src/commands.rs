//! CLI command implementations.

use std::io::{self, Read};

use afilter::{
    can_edit, init, Actor, Config, Error, FieldDescriptor, FieldKind, FilterRow, Group,
    QueryBuilder, QueryCodec, SchemaProvider, SchemaRegistry, Store, StoredFilter,
};
use uuid::Uuid;

use crate::ActorArgs;

/// Accepts every field path; used when no schema is available.
struct AnyField;

impl SchemaProvider for AnyField {
    fn resolve(&self, model: &str, path: &str) -> afilter::Result<FieldDescriptor> {
        let name = path.rsplit("__").next().unwrap_or(path);
        Ok(FieldDescriptor {
            name: name.to_string(),
            model: model.to_string(),
            verbose_name: name.replace('_', " "),
            kind: FieldKind::Other,
            choices: Vec::new(),
        })
    }
}

/// Schema from `--schema`, else AFILTER_ROOT/schema.toml, else unchecked.
fn load_schema(config: &Config, path: Option<&str>) -> afilter::Result<Box<dyn SchemaProvider>> {
    if let Some(path) = path {
        return Ok(Box::new(SchemaRegistry::load(std::path::Path::new(path))?));
    }

    let default_path = config.schema_path();
    if default_path.exists() {
        Ok(Box::new(SchemaRegistry::load(&default_path)?))
    } else {
        tracing::debug!(path = %default_path.display(), "No schema file, field paths are not checked");
        Ok(Box::new(AnyField))
    }
}

/// Read a JSON array of rows from a file, or stdin for `-`/none.
fn read_rows(source: Option<&str>) -> afilter::Result<Vec<FilterRow>> {
    let contents = match source {
        None | Some("-") => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        Some(path) => std::fs::read_to_string(path)?,
    };

    serde_json::from_str(&contents).map_err(|e| Error::Decode(format!("invalid rows: {}", e)))
}

fn parse_id(id: &str) -> afilter::Result<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|e| Error::NotFound(format!("invalid filter id '{}': {}", id, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> afilter::Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::SerializationType(e.to_string()))
}

fn actor_from(args: &ActorArgs) -> Actor {
    let username = args
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".to_string());

    let mut actor = Actor::new(username).with_groups(args.groups.iter().cloned());
    actor.is_superuser = args.superuser;
    actor
}

fn transport_codec(config: &Config, plain: bool) -> QueryCodec {
    let codec = QueryCodec::from_config(config);
    if plain {
        codec.with_base64(false)
    } else {
        codec
    }
}

/// Initialize the filter store.
pub fn init() -> afilter::Result<()> {
    let config = Config::default_location()?;

    if init::is_initialized(&config) {
        println!("Filter store already initialized at {}", config.root.display());
        return Ok(());
    }

    init::initialize(&config)?;
    println!("Filter store initialized at {}", config.root.display());
    Ok(())
}

/// Build rows into a query and print the encoded string.
pub fn encode(
    rows: Option<&str>,
    model: Option<&str>,
    schema: Option<&str>,
    plain: bool,
) -> afilter::Result<()> {
    let config = Config::load()?;
    let rows = read_rows(rows)?;

    let (schema, model): (Box<dyn SchemaProvider>, &str) = match model {
        Some(model) => (load_schema(&config, schema)?, model),
        None => (Box::new(AnyField) as Box<dyn SchemaProvider>, ""),
    };
    let query = QueryBuilder::new(schema.as_ref(), model).build(&rows)?;

    println!("{}", transport_codec(&config, plain).encode(&query.into())?);
    Ok(())
}

/// Decode a query string and print it in the requested form.
pub fn decode(
    query: &str,
    format: &str,
    model: Option<&str>,
    schema: Option<&str>,
    plain: bool,
) -> afilter::Result<()> {
    let config = Config::load()?;
    let codec = transport_codec(&config, plain);

    match format {
        "tree" => print!("{}", codec.decode(query)?),
        "mapping" => println!("{}", to_json(&codec.decode_raw(query)?)?),
        "fields" => println!("{}", to_json(&codec.decode_raw(query)?.field_values_list())?),
        "rows" => {
            let mapping = codec.decode_raw(query)?;
            let (schema, model): (Box<dyn SchemaProvider>, &str) = match model {
                Some(model) => (load_schema(&config, schema)?, model),
                None => (Box::new(AnyField) as Box<dyn SchemaProvider>, ""),
            };
            let rows = QueryBuilder::new(schema.as_ref(), model).project_to_rows(&mapping)?;
            println!("{}", to_json(&rows)?);
        }
        other => {
            return Err(Error::Config(format!(
                "unknown format '{}' (expected tree, mapping, fields or rows)",
                other
            )))
        }
    }
    Ok(())
}

/// Fields of a stored filter given on the command line.
pub struct SaveOptions {
    pub title: String,
    pub model: String,
    pub id: Option<String>,
    pub share_users: Vec<String>,
    pub share_groups: Vec<String>,
}

/// Create or update a stored filter from rows.
pub fn save(
    opts: &SaveOptions,
    rows: Option<&str>,
    schema: Option<&str>,
    actor: &ActorArgs,
) -> afilter::Result<()> {
    let config = Config::load()?;
    let schema = load_schema(&config, schema)?;
    let store = Store::open(config)?;
    let actor = actor_from(actor);

    let rows = read_rows(rows)?;
    let query = QueryBuilder::new(schema.as_ref(), opts.model.as_str()).build(&rows)?;

    let mut filter = match &opts.id {
        Some(id) => {
            let id = parse_id(id)?;
            store
                .get(id)?
                .ok_or_else(|| Error::NotFound(format!("filter {}", id)))?
        }
        None => StoredFilter::new(opts.title.as_str(), actor.username.as_str()),
    };

    filter.title = opts.title.clone();
    filter.model = Some(opts.model.clone());
    filter.set_query(&store.codec(), &query)?;
    if !opts.share_users.is_empty() {
        filter.shared_users = opts.share_users.iter().cloned().collect();
    }
    if !opts.share_groups.is_empty() {
        filter.shared_groups = opts.share_groups.iter().cloned().collect();
    }

    let saved = store.save(&actor, &filter)?;
    println!("{}", saved.id);
    Ok(())
}

/// List filters visible to the actor.
pub fn list(model: Option<&str>, format: &str, actor: &ActorArgs) -> afilter::Result<()> {
    let config = Config::load()?;
    let store = Store::open(config)?;
    let actor = actor_from(actor);

    let filters = match model {
        Some(model) => store.list_visible_for_model(&actor, model)?,
        None => store.list_visible(&actor)?,
    };

    match format {
        "json" => println!("{}", to_json(&filters)?),
        "table" => {
            if filters.is_empty() {
                println!("No filters shared with {}.", actor.username);
                return Ok(());
            }

            println!("{:<36} {:<12} {:<12} {:<19} TITLE", "ID", "MODEL", "OWNER", "CREATED");
            println!("{}", "-".repeat(90));
            for filter in filters {
                println!(
                    "{:<36} {:<12} {:<12} {:<19} {}",
                    filter.id,
                    filter.model.as_deref().unwrap_or("-"),
                    filter.owner,
                    filter.created_at.format("%Y-%m-%d %H:%M:%S"),
                    filter.title
                );
            }
        }
        other => {
            return Err(Error::Config(format!(
                "unknown format '{}' (expected table or json)",
                other
            )))
        }
    }
    Ok(())
}

/// Show a stored filter the actor can see or edit.
pub fn show(id: &str, format: &str, schema: Option<&str>, actor: &ActorArgs) -> afilter::Result<()> {
    let config = Config::load()?;
    let schema = load_schema(&config, schema)?;
    let store = Store::open(config)?;
    let actor = actor_from(actor);
    let id = parse_id(id)?;

    let filter = store
        .get(id)?
        .filter(|f| f.is_visible_to(&actor) || can_edit(&actor, f, store.config()))
        .ok_or_else(|| Error::NotFound(format!("filter {}", id)))?;

    let codec = store.codec();
    match format {
        "tree" => print!("{}", filter.query(&codec)?.unwrap_or_else(Group::empty)),
        "rows" => {
            let rows = if filter.encoded_query.trim().is_empty() {
                Vec::new()
            } else {
                let mapping = codec.decode_raw(&filter.encoded_query)?;
                QueryBuilder::new(schema.as_ref(), filter.model.as_deref().unwrap_or(""))
                    .project_to_rows(&mapping)?
            };
            println!("# {} ({})", filter.title, filter.id);
            println!("{}", to_json(&rows)?);
        }
        other => {
            return Err(Error::Config(format!(
                "unknown format '{}' (expected rows or tree)",
                other
            )))
        }
    }
    Ok(())
}

/// Delete a stored filter.
pub fn delete(id: &str, actor: &ActorArgs) -> afilter::Result<()> {
    let config = Config::load()?;
    let store = Store::open(config)?;
    let actor = actor_from(actor);
    let id = parse_id(id)?;

    store.delete(&actor, id)?;
    println!("Deleted filter {}", id);
    Ok(())
}
