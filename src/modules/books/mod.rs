pub mod handlers;
pub mod models;
pub mod repository;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{routing::get, Router};
use serde_json::json;

use shelf_db::Connector;
use shelf_kernel::{InitCtx, Module};

use handlers::BooksState;

/// CRUD over the warehouse `BOOKS` table.
pub struct BooksModule {
    state: BooksState,
}

impl BooksModule {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            state: BooksState { connector },
        }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            warehouse = %ctx.settings.warehouse.warehouse,
            database = %ctx.settings.warehouse.database,
            schema = %ctx.settings.warehouse.schema,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route(
                "/books",
                get(handlers::list_books).post(handlers::create_book),
            )
            .route(
                "/books/{id}",
                get(handlers::get_book)
                    .put(handlers::update_book)
                    .delete(handlers::delete_book),
            )
            .with_state(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                    }
                }
            })
        };
        let book = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/Book" }
                    }
                }
            })
        };
        let id_param = json!([{
            "name": "id",
            "in": "path",
            "required": true,
            "schema": { "type": "integer", "format": "int64" }
        }]);
        let create_body = json!({
            "required": true,
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/CreateBook" }
                }
            }
        });

        Some(json!({
            "paths": {
                "/books": {
                    "get": {
                        "summary": "List books ordered by id",
                        "tags": ["Books"],
                        "responses": {
                            "200": {
                                "description": "All books",
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "array",
                                            "items": { "$ref": "#/components/schemas/Book" }
                                        }
                                    }
                                }
                            },
                            "500": error("Internal server error")
                        }
                    },
                    "post": {
                        "summary": "Create a book",
                        "tags": ["Books"],
                        "requestBody": create_body.clone(),
                        "responses": {
                            "201": book("Created book with its assigned id"),
                            "422": error("Malformed payload"),
                            "500": error("Internal server error")
                        }
                    }
                },
                "/books/{id}": {
                    "get": {
                        "summary": "Get a book by id",
                        "tags": ["Books"],
                        "parameters": id_param.clone(),
                        "responses": {
                            "200": book("The book"),
                            "404": error("No book with this id"),
                            "422": error("Id is not an integer"),
                            "500": error("Internal server error")
                        }
                    },
                    "put": {
                        "summary": "Replace a book's title, author, and year",
                        "tags": ["Books"],
                        "parameters": id_param.clone(),
                        "requestBody": create_body,
                        "responses": {
                            "200": book("The updated book"),
                            "404": error("No book with this id"),
                            "422": error("Malformed id or payload"),
                            "500": error("Internal server error")
                        }
                    },
                    "delete": {
                        "summary": "Delete a book",
                        "tags": ["Books"],
                        "parameters": id_param,
                        "responses": {
                            "204": { "description": "Deleted" },
                            "404": error("No book with this id"),
                            "422": error("Id is not an integer"),
                            "500": error("Internal server error")
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Book": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "integer", "format": "int64" },
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "year": { "type": "integer", "format": "int32" }
                        },
                        "required": ["id", "title", "author", "year"]
                    },
                    "CreateBook": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "year": { "type": "integer", "format": "int32" }
                        },
                        "required": ["title", "author", "year"]
                    }
                }
            }
        }))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Create a new instance of the books module
pub fn create_module(connector: Arc<dyn Connector>) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(connector))
}
