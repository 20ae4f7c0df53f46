mod captured_items;
mod tags;
