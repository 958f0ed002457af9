//! SQL for the `BOOKS` table.
//!
//! Every function runs on a caller-owned [`Session`], so a multi-statement
//! operation observes its own writes.

use shelf_db::{DbError, Param, Row, Session};

use super::models::{Book, CreateBook};

pub const LIST_BOOKS: &str = "SELECT ID, TITLE, AUTHOR, YEAR FROM BOOKS ORDER BY ID";
pub const GET_BOOK: &str = "SELECT ID, TITLE, AUTHOR, YEAR FROM BOOKS WHERE ID = ? LIMIT 1";
/// `BOOKS.ID` defaults to this sequence, so ids drawn here never collide with
/// rows inserted elsewhere.
pub const NEXT_BOOK_ID: &str = "SELECT BOOKS_ID_SEQ.NEXTVAL";
pub const INSERT_BOOK: &str = "INSERT INTO BOOKS (ID, TITLE, AUTHOR, YEAR) VALUES (?, ?, ?, ?)";
pub const UPDATE_BOOK: &str = "UPDATE BOOKS SET TITLE = ?, AUTHOR = ?, YEAR = ? WHERE ID = ?";
pub const DELETE_BOOK: &str = "DELETE FROM BOOKS WHERE ID = ?";

#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("Book with id {0} not found")]
    NotFound(i64),

    #[error("id sequence returned no value")]
    NoIdAllocated,

    #[error("book {0} was inserted but could not be read back")]
    CreateInconsistency(i64),

    #[error(transparent)]
    Database(#[from] DbError),
}

fn book_from_row(row: &Row) -> Result<Book, DbError> {
    let year = row.int(3)?;
    Ok(Book {
        id: row.int(0)?,
        title: row.text(1)?,
        author: row.text(2)?,
        year: i32::try_from(year).map_err(|_| DbError::Decode {
            column: 3,
            reason: format!("year {} does not fit in 32 bits", year),
        })?,
    })
}

fn fields(book: &CreateBook) -> [Param; 3] {
    [
        Param::from(book.title.as_str()),
        Param::from(book.author.as_str()),
        Param::from(book.year),
    ]
}

pub async fn list(session: &mut Session) -> Result<Vec<Book>, BookError> {
    let result = session.query(LIST_BOOKS, &[]).await?;
    let books = result
        .rows
        .iter()
        .map(book_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(books)
}

pub async fn find(session: &mut Session, id: i64) -> Result<Option<Book>, BookError> {
    let result = session.query(GET_BOOK, &[Param::Int(id)]).await?;
    match result.into_first() {
        Some(row) => Ok(Some(book_from_row(&row)?)),
        None => Ok(None),
    }
}

pub async fn get(session: &mut Session, id: i64) -> Result<Book, BookError> {
    find(session, id).await?.ok_or(BookError::NotFound(id))
}

/// Insert under a freshly drawn id and read the row back by that id.
pub async fn create(session: &mut Session, book: &CreateBook) -> Result<Book, BookError> {
    let id = session
        .query(NEXT_BOOK_ID, &[])
        .await?
        .into_first()
        .ok_or(BookError::NoIdAllocated)?
        .int(0)?;

    let [title, author, year] = fields(book);
    session
        .query(INSERT_BOOK, &[Param::Int(id), title, author, year])
        .await?;

    find(session, id)
        .await?
        .ok_or(BookError::CreateInconsistency(id))
}

/// Replace every mutable field of book `id` and return the stored row.
pub async fn update(session: &mut Session, id: i64, book: &CreateBook) -> Result<Book, BookError> {
    let [title, author, year] = fields(book);
    let result = session
        .query(UPDATE_BOOK, &[title, author, year, Param::Int(id)])
        .await?;

    if result.rows_affected == 0 {
        return Err(BookError::NotFound(id));
    }

    // A concurrent delete can remove the row between the two statements.
    get(session, id).await
}

pub async fn delete(session: &mut Session, id: i64) -> Result<(), BookError> {
    let result = session.query(DELETE_BOOK, &[Param::Int(id)]).await?;
    if result.rows_affected == 0 {
        return Err(BookError::NotFound(id));
    }
    Ok(())
}
